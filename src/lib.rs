//! Tollgate - Adaptive Per-Client Rate Limiting
//!
//! This crate implements a per-client token bucket rate limiter that sits in
//! front of an HTTP API. Requests are classified into endpoint policies, each
//! client gets its own bucket, and idle clients are evicted in the background.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
