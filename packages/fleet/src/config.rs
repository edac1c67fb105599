use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Fleet configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Default tracing filter when `RUST_LOG` is not set
    pub log_filter: String,
    /// Container network every managed container joins
    pub network: String,
    /// Prefix of the labels marking managed containers
    pub label_prefix: String,
    /// How long to wait for a new container to become inspectable
    pub settle_timeout: Duration,
    /// Interval between synchronization sweeps
    pub sync_interval: Duration,
    pub shadow_cache_capacity: usize,
    pub database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info,fleet=debug,reactor=debug".to_string(),
            network: "fleet".to_string(),
            label_prefix: "fleet".to_string(),
            settle_timeout: Duration::from_millis(2000),
            sync_interval: Duration::from_secs(30),
            shadow_cache_capacity: reactor::DEFAULT_CACHE_CAPACITY,
            database_url: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        let defaults = Self::default();

        Ok(Self {
            log_filter: env::var("FLEET_LOG").unwrap_or(defaults.log_filter),
            network: env::var("FLEET_NETWORK").unwrap_or(defaults.network),
            label_prefix: env::var("FLEET_LABEL_PREFIX").unwrap_or(defaults.label_prefix),
            settle_timeout: match env::var("FLEET_SETTLE_TIMEOUT_MS") {
                Ok(ms) => Duration::from_millis(
                    ms.parse()
                        .context("FLEET_SETTLE_TIMEOUT_MS must be a number of milliseconds")?,
                ),
                Err(_) => defaults.settle_timeout,
            },
            sync_interval: match env::var("FLEET_SYNC_INTERVAL_SECS") {
                Ok(secs) => Duration::from_secs(
                    secs.parse()
                        .context("FLEET_SYNC_INTERVAL_SECS must be a number of seconds")?,
                ),
                Err(_) => defaults.sync_interval,
            },
            shadow_cache_capacity: match env::var("FLEET_SHADOW_CACHE_CAPACITY") {
                Ok(n) => n
                    .parse()
                    .context("FLEET_SHADOW_CACHE_CAPACITY must be a valid number")?,
                Err(_) => defaults.shadow_cache_capacity,
            },
            database_url: env::var("DATABASE_URL").ok(),
        })
    }

    /// Label key under the configured prefix, e.g. `fleet.kind`.
    pub fn label(&self, name: &str) -> String {
        format!("{}.{}", self.label_prefix, name)
    }

    /// Name of a runtime object owned by the fleet, e.g. `fleet-survival`.
    pub fn runtime_name(&self, name: &str) -> String {
        format!("{}-{}", self.label_prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_and_runtime_names_use_prefix() {
        let config = Config {
            label_prefix: "games".to_string(),
            ..Config::default()
        };
        assert_eq!(config.label("kind"), "games.kind");
        assert_eq!(config.runtime_name("survival"), "games-survival");
    }
}
