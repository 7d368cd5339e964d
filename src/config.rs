//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{CleanupSettings, PolicyTable};

/// Prefix for environment variable overrides, e.g. `TOLLGATE__SERVER__HTTP_ADDR`.
const ENV_PREFIX: &str = "TOLLGATE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Seconds between idle client sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Seconds without a request before a client is evicted
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Limits for each endpoint class
    #[serde(default)]
    pub policies: PolicyTable,

    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    /// Requests from any other peer are keyed by the socket address.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval(),
            idle_timeout_secs: default_idle_timeout(),
            policies: PolicyTable::default(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_cleanup_interval() -> u64 {
    600
}

fn default_idle_timeout() -> u64 {
    3600
}

impl RateLimitingConfig {
    /// Get the sweeper settings.
    pub fn cleanup_settings(&self) -> CleanupSettings {
        CleanupSettings {
            interval: Duration::from_secs(self.cleanup_interval_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cleanup_interval_secs == 0 {
            return Err(TollgateError::Config(
                "cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.idle_timeout_secs == 0 {
            return Err(TollgateError::Config(
                "idle_timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.policies.validate()
    }
}

impl TollgateConfig {
    /// Load configuration from an optional file, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: TollgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Policy;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.rate_limiting.cleanup_interval_secs, 600);
        assert_eq!(config.rate_limiting.idle_timeout_secs, 3600);
        assert!(config.rate_limiting.trusted_proxies.is_empty());
        assert!(config.validate().is_ok());

        let cleanup = config.rate_limiting.cleanup_settings();
        assert_eq!(cleanup, CleanupSettings::default());
    }

    #[test]
    fn test_parse_yaml_with_overrides() {
        let yaml = r#"
server:
  http_addr: "0.0.0.0:9000"
rate_limiting:
  idle_timeout_secs: 120
  policies:
    admin:
      rate: 2.0
      burst: 10
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.rate_limiting.idle_timeout_secs, 120);
        assert_eq!(config.rate_limiting.cleanup_interval_secs, 600);
        assert_eq!(config.rate_limiting.policies.admin, Policy::new(2.0, 10));
        assert_eq!(
            config.rate_limiting.policies.auth,
            PolicyTable::default().auth
        );
    }

    #[test]
    fn test_parse_trusted_proxies() {
        let yaml = r#"
rate_limiting:
  trusted_proxies:
    - 10.0.0.10
    - "::1"
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.rate_limiting.trusted_proxies,
            vec![
                "10.0.0.10".parse::<IpAddr>().unwrap(),
                "::1".parse::<IpAddr>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_empty_yaml() {
        let config = TollgateConfig::from_yaml("{}").unwrap();
        assert_eq!(config.rate_limiting.policies, PolicyTable::default());
        assert!(config.rate_limiting.trusted_proxies.is_empty());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let yaml = r#"
rate_limiting:
  cleanup_interval_secs: 0
"#;
        let err = TollgateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let yaml = r#"
rate_limiting:
  policies:
    auth:
      rate: 0.1
      burst: 0
"#;
        assert!(TollgateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_file_and_environment() {
        let path = std::env::temp_dir().join(format!("tollgate-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "rate_limiting:\n  cleanup_interval_secs: 30\n  policies:\n    default:\n      rate: 5.0\n      burst: 7\n",
        )
        .unwrap();

        std::env::set_var("TOLLGATE__RATE_LIMITING__IDLE_TIMEOUT_SECS", "90");
        let result = TollgateConfig::load(Some(path.as_path()));
        std::env::remove_var("TOLLGATE__RATE_LIMITING__IDLE_TIMEOUT_SECS");
        std::fs::remove_file(&path).unwrap();

        let config = result.unwrap();
        assert_eq!(config.rate_limiting.cleanup_interval_secs, 30);
        assert_eq!(config.rate_limiting.idle_timeout_secs, 90);
        assert_eq!(config.rate_limiting.policies.default, Policy::new(5.0, 7));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = Path::new("/nonexistent/tollgate.yaml");
        assert!(TollgateConfig::load(Some(path)).is_err());
    }
}
