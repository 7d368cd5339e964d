//! Client key derivation and per-client state.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::bucket::TokenBucket;
use super::policy::Policy;

/// A key that uniquely identifies a rate-limited client.
///
/// Anonymous clients are keyed by source IP alone. Once a user identity is
/// known the key becomes `ip:user`, so an authenticated client is tracked
/// separately from its earlier anonymous traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(String);

impl ClientKey {
    /// Create a key from a client IP and an optional user identifier.
    ///
    /// An empty user identifier is treated as absent.
    pub fn new(ip: &str, user_id: Option<&str>) -> Self {
        match user_id {
            Some(user) if !user.is_empty() => Self(format!("{}:{}", ip, user)),
            _ => Self(ip.to_string()),
        }
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the limiter tracks for one client key.
#[derive(Debug)]
pub struct ClientState {
    /// Token bucket for the policy this client last hit
    pub(crate) bucket: TokenBucket,
    /// Monotonic time of the most recent check, used for idle eviction
    pub(crate) last_seen: Instant,
    /// Wall-clock time of the most recent check, surfaced in stats
    pub(crate) last_seen_at: DateTime<Utc>,
    /// Authenticated user identifier, if known
    pub(crate) identity: Option<String>,
    /// Number of checks made for this key
    pub(crate) request_count: u64,
}

impl ClientState {
    /// Create state for a client seen for the first time.
    pub(crate) fn new(policy: Policy, identity: Option<&str>, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new(policy.rate, policy.burst, now),
            last_seen: now,
            last_seen_at: Utc::now(),
            identity: identity.filter(|id| !id.is_empty()).map(str::to_string),
            request_count: 0,
        }
    }

    /// Whether the current bucket was built for `policy`.
    pub(crate) fn is_built_for(&self, policy: Policy) -> bool {
        self.bucket.rate() == policy.rate && self.bucket.burst() == policy.burst
    }

    /// Swap in a fresh bucket for a different policy.
    ///
    /// The new bucket starts full, so any exhaustion under the old policy is
    /// forgotten.
    pub(crate) fn rebuild(&mut self, policy: Policy, now: Instant) {
        self.bucket = TokenBucket::new(policy.rate, policy.burst, now);
    }

    /// Record a check at `now`.
    ///
    /// `last_seen` never moves backwards, even if `now` is older.
    pub(crate) fn touch(&mut self, identity: Option<&str>, now: Instant) {
        self.last_seen = self.last_seen.max(now);
        self.last_seen_at = Utc::now();
        self.request_count += 1;

        if self.identity.is_none() {
            self.identity = identity.filter(|id| !id.is_empty()).map(str::to_string);
        }
    }

    /// Get the number of checks made for this client.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Get the authenticated identity, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Get the wall-clock time of the most recent check.
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }
}
