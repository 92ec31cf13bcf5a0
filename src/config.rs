//! Configuration management for countgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};
use crate::ratelimit::{LimitCountConfig, DEFAULT_TIMEOUT};

/// Prefix of environment variables overriding file settings.
pub const ENV_PREFIX: &str = "COUNTGATE";

/// Main configuration for the countgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Limiter rules and policies
    #[serde(default)]
    pub limiter: LimitCountConfig,
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

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL; credentials, database and TLS (`rediss://`) go here
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Timeout for connecting and for each limiter evaluation
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

impl CountgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load layered configuration: defaults, then the optional YAML file, then
    /// `COUNTGATE__`-prefixed environment variables (e.g. `COUNTGATE__STORE__URL`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }
        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CountgateConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.store.url, "redis://127.0.0.1:6379/");
        assert_eq!(config.store.timeout(), Duration::from_secs(3));
        assert!(config.limiter.rules.is_empty());
    }

    #[test]
    fn test_default_timeout_matches_store_default() {
        assert_eq!(StoreConfig::default().timeout(), DEFAULT_TIMEOUT);

        let config = CountgateConfig::from_yaml("store:\n  url: redis://cache:6379/\n").unwrap();
        assert_eq!(config.store.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
store:
  url: redis://cache:6379/2
  timeout_ms: 250
limiter:
  failure_mode_deny: true
  rules:
    - count: 10
      time_window: 1m
"#;
        let config = CountgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.store.url, "redis://cache:6379/2");
        assert_eq!(config.store.timeout(), Duration::from_millis(250));
        assert!(config.limiter.failure_mode_deny);

        let compiled = config.limiter.compile().unwrap();
        assert_eq!(compiled.limiters()[0].time_window().as_secs(), 60);
    }

    #[test]
    fn test_load_file_with_defaults() {
        let path = std::env::temp_dir().join(format!("countgate-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "limiter:\n  enable_limit_quota_headers: true\n  rules:\n    - count: 3\n      time_window: 30s\n",
        )
        .unwrap();

        let config = CountgateConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.store.timeout_ms, 3000);
        assert!(config.limiter.enable_limit_quota_headers);
        assert_eq!(config.limiter.rules[0].count, 3);
        assert_eq!(config.limiter.rules[0].time_window.as_secs(), 30);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = CountgateConfig::load(Some(Path::new("/nonexistent/countgate.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
