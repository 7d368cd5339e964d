//! Rate limit policies and endpoint classification.
//!
//! Every request is mapped to one of a fixed set of policy classes based on
//! its method and path. The class selects a refill rate and burst capacity
//! from the [`PolicyTable`], which can be overridden from configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, TollgateError};

const AUTH_LOGIN_PATH: &str = "/api/v1/auth/login";
const AUTH_REGISTER_PATH: &str = "/api/v1/auth/register";
const ADMIN_USERS_PATH: &str = "/api/v1/admin/users";
const PRODUCTS_PATH: &str = "/api/v1/products";
const STATUS_PATH: &str = "/api/v1/status";

/// A named class of endpoints sharing the same limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Anything not matched by a more specific rule
    Default,
    /// Login and registration
    Auth,
    /// Health status and unclassified product collection traffic
    Public,
    /// Admin listings
    Admin,
    /// Reads of the product collection
    ProductRead,
    /// Writes to the product collection
    ProductWrite,
}

impl PolicyKind {
    /// Classify a request by HTTP method and path.
    ///
    /// A single trailing `/` is ignored. Rules are checked in a fixed order
    /// and the first match wins.
    pub fn resolve(method: &str, path: &str) -> Self {
        let path = path.strip_suffix('/').unwrap_or(path);

        if path == AUTH_LOGIN_PATH || path == AUTH_REGISTER_PATH {
            return PolicyKind::Auth;
        }

        if path == ADMIN_USERS_PATH {
            return PolicyKind::Admin;
        }

        if path == PRODUCTS_PATH {
            match method {
                "POST" | "PUT" | "DELETE" => return PolicyKind::ProductWrite,
                "GET" => return PolicyKind::ProductRead,
                _ => {}
            }
        }

        if path == STATUS_PATH || path == PRODUCTS_PATH {
            return PolicyKind::Public;
        }

        PolicyKind::Default
    }

    /// Get the configuration name of this policy class.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Default => "default",
            PolicyKind::Auth => "auth",
            PolicyKind::Public => "public",
            PolicyKind::Admin => "admin",
            PolicyKind::ProductRead => "product_read",
            PolicyKind::ProductWrite => "product_write",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refill rate and burst capacity for one policy class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Tokens added per second
    pub rate: f64,
    /// Maximum tokens held at once
    pub burst: u32,
}

impl Policy {
    /// Create a policy from a rate in tokens per second.
    pub const fn new(rate: f64, burst: u32) -> Self {
        Self { rate, burst }
    }

    /// Create a policy that adds one token every `interval`.
    pub fn every(interval: Duration, burst: u32) -> Self {
        Self {
            rate: 1.0 / interval.as_secs_f64(),
            burst,
        }
    }

    fn validate(&self, kind: PolicyKind) -> Result<()> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(TollgateError::Config(format!(
                "policy '{}' must have a positive rate, got {}",
                kind, self.rate
            )));
        }
        if self.burst == 0 {
            return Err(TollgateError::Config(format!(
                "policy '{}' must have a burst of at least 1",
                kind
            )));
        }
        Ok(())
    }
}

/// The full set of policies, one per [`PolicyKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyTable {
    pub default: Policy,
    pub auth: Policy,
    pub public: Policy,
    pub admin: Policy,
    pub product_read: Policy,
    pub product_write: Policy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            default: Policy::new(10.0, 20),
            auth: Policy::new(0.1, 5),
            public: Policy::new(0.1, 100),
            admin: Policy::new(0.1, 50),
            product_read: Policy::new(1.0, 100),
            product_write: Policy::new(0.05, 20),
        }
    }
}

impl PolicyTable {
    /// Get the policy for a class.
    pub fn get(&self, kind: PolicyKind) -> Policy {
        match kind {
            PolicyKind::Default => self.default,
            PolicyKind::Auth => self.auth,
            PolicyKind::Public => self.public,
            PolicyKind::Admin => self.admin,
            PolicyKind::ProductRead => self.product_read,
            PolicyKind::ProductWrite => self.product_write,
        }
    }

    /// Resolve the policy for a request.
    pub fn resolve(&self, method: &str, path: &str) -> (PolicyKind, Policy) {
        let kind = PolicyKind::resolve(method, path);
        (kind, self.get(kind))
    }

    /// Check that every policy can actually admit traffic.
    pub fn validate(&self) -> Result<()> {
        for kind in [
            PolicyKind::Default,
            PolicyKind::Auth,
            PolicyKind::Public,
            PolicyKind::Admin,
            PolicyKind::ProductRead,
            PolicyKind::ProductWrite,
        ] {
            self.get(kind).validate(kind)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_auth_endpoints() {
        assert_eq!(PolicyKind::resolve("POST", "/api/v1/auth/login"), PolicyKind::Auth);
        assert_eq!(PolicyKind::resolve("POST", "/api/v1/auth/register"), PolicyKind::Auth);
        assert_eq!(PolicyKind::resolve("GET", "/api/v1/auth/login/"), PolicyKind::Auth);
    }

    #[test]
    fn test_resolve_admin_endpoint() {
        assert_eq!(PolicyKind::resolve("GET", "/api/v1/admin/users"), PolicyKind::Admin);
    }

    #[test]
    fn test_resolve_products_by_method() {
        assert_eq!(PolicyKind::resolve("GET", "/api/v1/products"), PolicyKind::ProductRead);
        assert_eq!(PolicyKind::resolve("GET", "/api/v1/products/"), PolicyKind::ProductRead);
        assert_eq!(PolicyKind::resolve("POST", "/api/v1/products"), PolicyKind::ProductWrite);
        assert_eq!(PolicyKind::resolve("PUT", "/api/v1/products"), PolicyKind::ProductWrite);
        assert_eq!(PolicyKind::resolve("DELETE", "/api/v1/products"), PolicyKind::ProductWrite);
        assert_eq!(PolicyKind::resolve("HEAD", "/api/v1/products"), PolicyKind::Public);
    }

    #[test]
    fn test_resolve_status_is_public() {
        assert_eq!(PolicyKind::resolve("GET", "/api/v1/status"), PolicyKind::Public);
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        assert_eq!(PolicyKind::resolve("GET", "/api/v1/unknown/path"), PolicyKind::Default);
        // Item routes are not the collection
        assert_eq!(PolicyKind::resolve("DELETE", "/api/v1/products/42"), PolicyKind::Default);
        assert_eq!(PolicyKind::resolve("GET", "/"), PolicyKind::Default);
    }

    #[test]
    fn test_default_table_policies_are_distinct() {
        let table = PolicyTable::default();
        let kinds = [
            PolicyKind::Default,
            PolicyKind::Auth,
            PolicyKind::Public,
            PolicyKind::Admin,
            PolicyKind::ProductRead,
            PolicyKind::ProductWrite,
        ];

        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(table.get(*a), table.get(*b), "{} and {} collide", a, b);
            }
        }
    }

    #[test]
    fn test_policy_every() {
        let policy = Policy::every(Duration::from_secs(10), 5);
        assert!((policy.rate - 0.1).abs() < f64::EPSILON);
        assert_eq!(policy.burst, 5);
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        let mut table = PolicyTable::default();
        assert!(table.validate().is_ok());

        table.admin.burst = 0;
        assert!(table.validate().is_err());

        let mut table = PolicyTable::default();
        table.auth.rate = 0.0;
        assert!(table.validate().is_err());

        let mut table = PolicyTable::default();
        table.public.rate = f64::NAN;
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_parse_partial_table() {
        let yaml = r#"
auth:
  rate: 0.5
  burst: 3
"#;
        let table: PolicyTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(table.auth, Policy::new(0.5, 3));
        assert_eq!(table.default, PolicyTable::default().default);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(PolicyKind::ProductWrite.to_string(), "product_write");
        assert_eq!(PolicyKind::Default.as_str(), "default");
    }
}
