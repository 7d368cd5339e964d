//! HTTP server implementation.

use axum::{extract::State, middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{rate_limit_middleware, RateLimitState};
use crate::error::{Result, TollgateError};
use crate::ratelimit::RateLimiter;

/// Build the router with the built-in routes, `routes` merged in, and every
/// request passing through the rate limiter.
pub fn router(state: RateLimitState, routes: Router) -> Router {
    let builtin = Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/rate-limit-stats", get(rate_limit_stats))
        .with_state(state.limiter().clone());

    routes
        .merge(builtin)
        .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
}

async fn status() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn rate_limit_stats(State(rate_limiter): State<Arc<RateLimiter>>) -> Json<Value> {
    Json(json!({ "rate_limit_stats": rate_limiter.stats() }))
}

/// HTTP server fronted by the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    /// Peers allowed to set the client address via forwarding headers
    trusted_proxies: Vec<IpAddr>,
    /// Application routes served behind the limiter
    routes: Router,
}

impl HttpServer {
    /// Create a new HTTP server serving only the built-in routes.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            addr,
            rate_limiter,
            trusted_proxies: Vec::new(),
            routes: Router::new(),
        }
    }

    /// Believe forwarding headers from these peers.
    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = proxies;
        self
    }

    /// Add application routes to serve behind the limiter.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves. The rate
    /// limiter is left running; its owner decides when to shut it down.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            trusted_proxies = self.trusted_proxies.len(),
            "Starting HTTP server with graceful shutdown"
        );

        let state = RateLimitState::new(self.rate_limiter).with_trusted_proxies(self.trusted_proxies);
        let app = router(state, self.routes);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{CleanupSettings, PolicyTable};
    use axum::{
        body::{to_bytes, Body},
        extract::{ConnectInfo, Request},
        http::StatusCode,
    };
    use tower::ServiceExt;

    fn test_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(PolicyTable::default(), CleanupSettings::default()).unwrap())
    }

    fn test_state() -> RateLimitState {
        RateLimitState::new(test_limiter())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let mut request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40000))));
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let _server = HttpServer::new(addr, test_limiter())
            .with_trusted_proxies(vec!["10.0.0.10".parse().unwrap()])
            .with_routes(Router::new());
    }

    #[tokio::test]
    async fn test_status_route() {
        let app = router(test_state(), Router::new());

        let (status, body) = get_json(app, "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_stats_route_reports_clients() {
        let limiter = test_limiter();
        let app = router(RateLimitState::new(limiter.clone()), Router::new());

        get_json(app.clone(), "/api/v1/status").await;
        let (status, body) = get_json(app, "/api/v1/rate-limit-stats").await;

        assert_eq!(status, StatusCode::OK);
        let stats = &body["rate_limit_stats"];
        assert_eq!(stats["total_clients"], 1);
        // The stats request itself is counted
        assert_eq!(stats["clients"]["10.0.0.1"]["request_count"], 2);
        assert!(stats["clients"]["10.0.0.1"]["user_id"].is_null());
    }

    #[tokio::test]
    async fn test_application_routes_are_limited() {
        let limiter = test_limiter();
        let routes = Router::new().route(
            "/api/v1/admin/users",
            get(|| async { Json(json!({ "users": [] })) }),
        );
        let app = router(RateLimitState::new(limiter), routes);

        for _ in 0..50 {
            let (status, _) = get_json(app.clone(), "/api/v1/admin/users").await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = get_json(app, "/api/v1/admin/users").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["burst"], 50);
    }

    #[tokio::test]
    async fn test_serve_stops_on_signal() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = HttpServer::new(addr, test_limiter());

        let result = server.serve_with_shutdown(async {}).await;
        assert!(result.is_ok());
    }
}
