//! Rate limiting logic and state management.

mod bucket;
mod client;
mod limiter;
mod policy;
mod sweeper;

pub use bucket::TokenBucket;
pub use client::{ClientKey, ClientState};
pub use limiter::{
    CleanupSettings, ClientSnapshot, LimiterStats, RateLimiter, Rejection, Verdict,
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_IDLE_TIMEOUT,
};
pub use policy::{Policy, PolicyKind, PolicyTable};
