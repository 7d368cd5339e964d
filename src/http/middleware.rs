//! Rate limiting middleware.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

use crate::ratelimit::{RateLimiter, Verdict};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_BURST: HeaderName = HeaderName::from_static("x-ratelimit-burst");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";
const UNKNOWN_CLIENT: &str = "unknown";

/// Authenticated user identifier.
///
/// An authentication layer running before [`rate_limit_middleware`] inserts
/// this into the request extensions so the client is tracked per user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

/// State for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    trusted_proxies: Arc<[IpAddr]>,
}

impl RateLimitState {
    /// Create state that keys every client by its socket peer address.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            trusted_proxies: Vec::<IpAddr>::new().into(),
        }
    }

    /// Believe forwarding headers on requests arriving from these peers.
    pub fn with_trusted_proxies(mut self, proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        self.trusted_proxies = proxies.into_iter().collect();
        self
    }

    /// Get the rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

/// Determine the client IP for a request.
///
/// The socket peer address is used unless the peer is one of
/// `trusted_proxies`. For a trusted peer the first `X-Forwarded-For` entry
/// wins, then `X-Real-IP`, then the peer itself.
pub fn client_ip(request: &Request, trusted_proxies: &[IpAddr]) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let Some(peer) = peer else {
        return UNKNOWN_CLIENT.to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let headers = request.headers();

    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.to_string()
}

/// Admit or reject a request before it reaches its handler.
///
/// Rejected requests get a 429 with a JSON body. Both outcomes carry the
/// `X-RateLimit-*` headers.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request, &state.trusted_proxies);
    let user = request.extensions().get::<Identity>().map(|id| id.0.clone());

    let verdict = state.limiter.check(
        request.method().as_str(),
        request.uri().path(),
        &ip,
        user.as_deref(),
    );

    if let Some(rejection) = verdict.rejection() {
        debug!(
            client_ip = %ip,
            user = ?user,
            method = %request.method(),
            path = %request.uri().path(),
            retry_after = rejection.retry_after,
            "Request rate limited"
        );

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(rejection)).into_response();
        apply_headers(response.headers_mut(), &verdict);
        return response;
    }

    debug!(
        client_ip = %ip,
        remaining = verdict.remaining,
        "Request admitted"
    );

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &verdict);
    response
}

fn apply_headers(headers: &mut HeaderMap, verdict: &Verdict) {
    if let Ok(limit) = HeaderValue::from_str(&format!("{:.2}", verdict.limit)) {
        headers.insert(X_RATELIMIT_LIMIT, limit);
    }
    headers.insert(X_RATELIMIT_BURST, HeaderValue::from(verdict.burst));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(verdict.remaining));

    if verdict.allowed {
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(verdict.wait_secs));
    } else {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(verdict.wait_secs));
    }
}
