//! labfleet.toml configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use labfleet_gitstore::StoreConfig;
use labfleet_inventory::Environment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub environment: Environment,
    pub inventory: StoreConfig,
    /// Queen drone hostname per environment, keyed by `ENVIRONMENT_*` name.
    #[serde(default)]
    pub queen_drones: BTreeMap<String, String>,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub balancing: BalancingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Timeout for every outbound HTTP call.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Base URL of the health tracker. Empty means every DUT reports `UNKNOWN`.
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancingConfig {
    /// Width of the per-model worker pool.
    pub workers: usize,
}

impl Default for BalancingConfig {
    fn default() -> Self {
        Self { workers: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// redb file. `None` keeps the cache in memory.
    pub path: Option<PathBuf>,
    pub freshness_secs: u64,
    pub freshness_overrides: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            freshness_secs: 300,
            freshness_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Admitted mutating requests per period. 0 disables limiting.
    pub max_requests: u32,
    pub period_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            period_secs: 60,
        }
    }
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl ServiceConfig {
    /// A configuration with defaults for everything but the essentials.
    pub fn new(environment: Environment, inventory: StoreConfig) -> Self {
        Self {
            environment,
            inventory,
            queen_drones: BTreeMap::new(),
            tracker: TrackerConfig::default(),
            retry: RetryConfig::default(),
            balancing: BalancingConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.environment == Environment::Invalid {
            anyhow::bail!("environment must be set");
        }
        if self.inventory.lab_path.is_empty() || self.inventory.infrastructure_path.is_empty() {
            anyhow::bail!("inventory paths must not be empty");
        }
        if self.queen_drone().is_none() {
            anyhow::bail!("no queen drone configured for {}", self.environment);
        }
        if self.balancing.workers == 0 {
            anyhow::bail!("balancing.workers must be positive");
        }
        if self.retry.attempts == 0 {
            anyhow::bail!("retry.attempts must be positive");
        }
        Ok(())
    }

    /// Queen drone hostname for the configured environment.
    pub fn queen_drone(&self) -> Option<&str> {
        self.queen_drones
            .get(self.environment.as_str())
            .map(String::as_str)
            .filter(|h| !h.is_empty())
    }

    /// Staleness budget for cached DUTs of `env`.
    pub fn freshness_for(&self, env: Environment) -> Duration {
        let secs = self
            .cache
            .freshness_overrides
            .get(env.as_str())
            .copied()
            .unwrap_or(self.cache.freshness_secs);
        Duration::from_secs(secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
environment = "ENVIRONMENT_STAGING"

[inventory]
gitiles_host = "https://gitiles.example.com"
gerrit_host = "https://review.example.com"
project = "infra/config"

[queen_drones]
ENVIRONMENT_STAGING = "drone-queen-ENVIRONMENT_STAGING"

[tracker]
host = "http://localhost:8800"

[retry]
attempts = 5

[cache]
freshness_secs = 120
[cache.freshness_overrides]
ENVIRONMENT_PROD = 60

[rate_limit]
max_requests = 2
period_secs = 10
"#;

    #[test]
    fn parse_full_config() {
        let config: ServiceConfig = toml::from_str(FULL).unwrap();
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.inventory.branch, "main");
        assert_eq!(config.inventory.lab_path, "data/skylab/lab.textpb");
        assert_eq!(config.queen_drone(), Some("drone-queen-ENVIRONMENT_STAGING"));
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.backoff_ms, 200);
        assert_eq!(config.balancing.workers, 10);
        assert_eq!(config.rate_limit.max_requests, 2);
        assert_eq!(config.freshness_for(Environment::Staging), Duration::from_secs(120));
        assert_eq!(config.freshness_for(Environment::Prod), Duration::from_secs(60));
        config.validate().unwrap();
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let toml = r#"
environment = "ENVIRONMENT_PROD"
[inventory]
project = "infra/config"
"#;
        let config: ServiceConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.environment, Environment::Prod);
        assert!(config.cache.path.is_none());
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        // No queen drone for prod.
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let mut config: ServiceConfig = toml::from_str(FULL).unwrap();
        config.balancing.workers = 0;
        assert!(config.validate().is_err());

        let mut config: ServiceConfig = toml::from_str(FULL).unwrap();
        config.inventory.lab_path.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labfleet.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(config.inventory.project, "infra/config");
        assert!(ServiceConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
