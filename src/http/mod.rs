//! HTTP boundary for the rate limiter.

mod middleware;
mod server;

pub use middleware::{client_ip, rate_limit_middleware, Identity, RateLimitState};
pub use server::{router, HttpServer};
