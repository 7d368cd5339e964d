//! Core rate limiter implementation.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::bucket::ceil_secs;
use super::client::{ClientKey, ClientState};
use super::policy::{Policy, PolicyTable};
use super::sweeper::Sweeper;
use crate::config::RateLimitingConfig;
use crate::error::{Result, TollgateError};

/// Default time between idle sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Default idle time after which a client is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

const REJECTION_ERROR: &str = "Too Many Requests";
const REJECTION_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// How often idle clients are evicted and how idle they must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSettings {
    /// Time between sweeps
    pub interval: Duration,
    /// Clients not seen for longer than this are evicted
    pub idle_timeout: Duration,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CLEANUP_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl CleanupSettings {
    /// Check that both durations are non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(TollgateError::Config(
                "cleanup interval must be greater than zero".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(TollgateError::Config(
                "idle timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of one pass over the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SweepOutcome {
    pub(crate) evicted: usize,
    pub(crate) remaining: usize,
}

/// Client state shared between the limiter and its sweeper.
pub(crate) struct Registry {
    clients: RwLock<HashMap<ClientKey, ClientState>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Remove clients idle for longer than `idle_timeout` as of `now`.
    pub(crate) fn sweep(&self, now: Instant, idle_timeout: Duration) -> SweepOutcome {
        let mut clients = self.clients.write();
        let before = clients.len();
        clients.retain(|_, client| now.saturating_duration_since(client.last_seen) <= idle_timeout);
        SweepOutcome {
            evicted: before - clients.len(),
            remaining: clients.len(),
        }
    }

    fn len(&self) -> usize {
        self.clients.read().len()
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Refill rate of the applied policy, in tokens per second
    pub limit: f64,
    /// Burst capacity of the applied policy
    pub burst: u32,
    /// Whole tokens left after this check (always 0 when denied)
    pub remaining: u32,
    /// Seconds until a retry can succeed when denied, or until the bucket is
    /// full again when allowed
    pub wait_secs: u64,
}

impl Verdict {
    /// Build the 429 payload for a denied request.
    pub fn rejection(&self) -> Option<Rejection> {
        if self.allowed {
            return None;
        }
        Some(Rejection {
            error: REJECTION_ERROR,
            message: REJECTION_MESSAGE,
            retry_after: self.wait_secs,
            limit: self.limit,
            burst: self.burst,
        })
    }
}

/// Body returned to a client that has been rate limited.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub error: &'static str,
    pub message: &'static str,
    pub retry_after: u64,
    pub limit: f64,
    pub burst: u32,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub total_clients: usize,
    pub clients: BTreeMap<String, ClientSnapshot>,
}

/// Administrative fields of one tracked client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub last_seen: DateTime<Utc>,
    pub request_count: u64,
    pub user_id: Option<String>,
}

/// Per-client token bucket rate limiter.
///
/// All client state lives behind a single lock. Each check finds or creates
/// the client's entry, rebuilds its bucket if the request maps to a different
/// policy, and consumes one token, all inside one critical section. A
/// background sweeper evicts clients that have gone idle.
pub struct RateLimiter {
    registry: Arc<Registry>,
    policies: PolicyTable,
    cleanup: CleanupSettings,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RateLimiter {
    /// Create a new rate limiter and start its sweeper.
    ///
    /// Fails if any policy has a non-positive rate or a zero burst, or if
    /// either cleanup duration is zero. Must be called from within a tokio
    /// runtime.
    pub fn new(policies: PolicyTable, cleanup: CleanupSettings) -> Result<Self> {
        policies.validate()?;
        cleanup.validate()?;

        let registry = Arc::new(Registry::new());
        let sweeper = Sweeper::spawn(registry.clone(), cleanup.interval, cleanup.idle_timeout);

        Ok(Self {
            registry,
            policies,
            cleanup,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Create a rate limiter from service configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        Self::new(config.policies.clone(), config.cleanup_settings())
    }

    /// Get the policy table.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Check whether a request may proceed and consume a token if so.
    pub fn check(&self, method: &str, path: &str, client_ip: &str, user_id: Option<&str>) -> Verdict {
        let key = ClientKey::new(client_ip, user_id);
        let (kind, policy) = self.policies.resolve(method, path);

        trace!(
            client = %key,
            method = method,
            path = path,
            policy = %kind,
            "Checking rate limit"
        );

        let mut clients = self.registry.clients.write();
        // Read the clock under the lock so `last_seen` follows lock order
        let now = Instant::now();
        admit(&mut clients, &key, policy, user_id, now)
    }

    /// Run the admission check for `key` under `policy` as of `now`.
    pub fn check_at(
        &self,
        key: &ClientKey,
        policy: Policy,
        user_id: Option<&str>,
        now: Instant,
    ) -> Verdict {
        let mut clients = self.registry.clients.write();
        admit(&mut clients, key, policy, user_id, now)
    }

    /// Snapshot the tracked clients.
    pub fn stats(&self) -> LimiterStats {
        let clients = self.registry.clients.read();

        LimiterStats {
            total_clients: clients.len(),
            clients: clients
                .iter()
                .map(|(key, client)| {
                    (
                        key.to_string(),
                        ClientSnapshot {
                            last_seen: client.last_seen_at(),
                            request_count: client.request_count(),
                            user_id: client.identity().map(str::to_string),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Get the number of tracked clients.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Drop all client state.
    pub fn clear_all(&self) {
        let mut clients = self.registry.clients.write();
        let cleared = clients.len();
        clients.clear();
        info!(cleared, "Cleared all rate limit state");
    }

    /// Evict clients idle as of `now`, as the sweeper would.
    ///
    /// Returns the number of evicted clients.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        self.registry.sweep(now, self.cleanup.idle_timeout).evicted
    }

    /// Stop the sweeper, drop all state, and start a fresh sweeper.
    pub fn reset(&self) {
        let mut sweeper = self.sweeper.lock();
        if let Some(old) = sweeper.take() {
            old.stop();
        }

        self.registry.clients.write().clear();

        *sweeper = Some(Sweeper::spawn(
            self.registry.clone(),
            self.cleanup.interval,
            self.cleanup.idle_timeout,
        ));
        info!("Rate limiter reset");
    }

    /// Stop the sweeper.
    ///
    /// The limiter must not be used for admission checks afterwards.
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
            info!("Rate limiter shut down");
        }
    }

    /// Whether the sweeper task is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|sweeper| !sweeper.is_finished())
    }
}

/// Find or create the entry for `key`, rebuild it if `policy` changed, and
/// try to consume one token.
fn admit(
    clients: &mut HashMap<ClientKey, ClientState>,
    key: &ClientKey,
    policy: Policy,
    user_id: Option<&str>,
    now: Instant,
) -> Verdict {
    let client = clients.entry(key.clone()).or_insert_with(|| {
        debug!(
            client = %key,
            rate = policy.rate,
            burst = policy.burst,
            "Creating new client state"
        );
        ClientState::new(policy, user_id, now)
    });

    if !client.is_built_for(policy) {
        debug!(
            client = %key,
            old_rate = client.bucket.rate(),
            old_burst = client.bucket.burst(),
            rate = policy.rate,
            burst = policy.burst,
            "Policy changed, rebuilding bucket"
        );
        client.rebuild(policy, now);
    }

    client.touch(user_id, now);

    if client.bucket.try_acquire(now) {
        Verdict {
            allowed: true,
            limit: policy.rate,
            burst: policy.burst,
            remaining: client.bucket.remaining(now),
            wait_secs: ceil_secs(client.bucket.duration_until_full(now)),
        }
    } else {
        let retry_after = ceil_secs(client.bucket.delay_until_available(now)).max(1);
        debug!(
            client = %key,
            retry_after = retry_after,
            requests = client.request_count,
            "Rate limit exceeded"
        );
        Verdict {
            allowed: false,
            limit: policy.rate,
            burst: policy.burst,
            remaining: 0,
            wait_secs: retry_after,
        }
    }
}
