//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Job queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Fan-out configuration.
    #[serde(default)]
    pub distribution: DistributionConfig,
    /// Reference resolution configuration.
    #[serde(default)]
    pub references: ReferenceConfig,
    /// Federation client configuration.
    #[serde(default)]
    pub federation: FederationConfig,
    /// Search indexing configuration.
    #[serde(default)]
    pub search: SearchConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Job queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Workers on the `default` lane.
    #[serde(default = "default_default_concurrency")]
    pub default_concurrency: usize,
    /// Workers on the `push` lane.
    #[serde(default = "default_push_concurrency")]
    pub push_concurrency: usize,
    /// Workers on the `pull` lane.
    #[serde(default = "default_pull_concurrency")]
    pub pull_concurrency: usize,
    /// Sleep between polls of an empty lane, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum execution time of a single job, in seconds.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// First retry delay, in seconds.
    #[serde(default = "default_retry_initial_delay_secs")]
    pub retry_initial_delay_secs: u64,
    /// Upper bound on retry delay, in seconds.
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
    /// Number of dead-letter entries kept.
    #[serde(default = "default_dead_letter_max")]
    pub dead_letter_max: usize,
    /// Interval of the retry promoter and stalled-job reaper, in seconds.
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,
}

/// Fan-out configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DistributionConfig {
    /// Lease of the per-status distribution lock, in seconds.
    #[serde(default = "default_lock_lease_secs")]
    pub lock_lease_secs: u64,
    /// Maximum number of entries kept in a home feed.
    #[serde(default = "default_home_feed_max")]
    pub home_feed_max: usize,
    /// Retry budget of distribution jobs.
    #[serde(default = "default_distribution_max_retries")]
    pub max_retries: u32,
}

/// Reference resolution configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    /// Retry budget of a single reference resolution.
    #[serde(default = "default_reference_max_retries")]
    pub max_retries: u32,
    /// Maximum number of references processed per status.
    #[serde(default = "default_max_references")]
    pub max_references_per_status: usize,
}

/// Federation client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Domain of this instance; URLs on it resolve locally.
    #[serde(default = "default_local_domain")]
    pub local_domain: String,
    /// User agent sent on remote fetches.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Remote fetch timeout, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

/// Search indexing configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchConfig {
    /// Whether statuses are indexed at all.
    #[serde(default)]
    pub enabled: bool,
    /// Meilisearch host URL.
    #[serde(default)]
    pub meilisearch_url: Option<String>,
    /// Meilisearch API key.
    #[serde(default)]
    pub meilisearch_api_key: Option<String>,
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

fn default_redis_prefix() -> String {
    "fanout".to_string()
}

const fn default_default_concurrency() -> usize {
    5
}

const fn default_push_concurrency() -> usize {
    5
}

const fn default_pull_concurrency() -> usize {
    3
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_execution_timeout_secs() -> u64 {
    120
}

const fn default_retry_initial_delay_secs() -> u64 {
    15
}

const fn default_retry_max_delay_secs() -> u64 {
    3600 * 6
}

const fn default_dead_letter_max() -> usize {
    10_000
}

const fn default_scheduler_interval_secs() -> u64 {
    5
}

const fn default_lock_lease_secs() -> u64 {
    300
}

const fn default_home_feed_max() -> usize {
    800
}

const fn default_distribution_max_retries() -> u32 {
    5
}

const fn default_reference_max_retries() -> u32 {
    3
}

const fn default_max_references() -> usize {
    20
}

fn default_local_domain() -> String {
    "localhost".to_string()
}

fn default_user_agent() -> String {
    format!("fanout-rs/{}", env!("CARGO_PKG_VERSION"))
}

const fn default_fetch_timeout_secs() -> u64 {
    10
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_default_concurrency(),
            push_concurrency: default_push_concurrency(),
            pull_concurrency: default_pull_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            execution_timeout_secs: default_execution_timeout_secs(),
            retry_initial_delay_secs: default_retry_initial_delay_secs(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
            dead_letter_max: default_dead_letter_max(),
            scheduler_interval_secs: default_scheduler_interval_secs(),
        }
    }
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            lock_lease_secs: default_lock_lease_secs(),
            home_feed_max: default_home_feed_max(),
            max_retries: default_distribution_max_retries(),
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_reference_max_retries(),
            max_references_per_status: default_max_references(),
        }
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            local_domain: default_local_domain(),
            user_agent: default_user_agent(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl QueueConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Execution timeout as a [`Duration`].
    #[must_use]
    pub const fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    /// Scheduler interval as a [`Duration`].
    #[must_use]
    pub const fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }
}

impl DistributionConfig {
    /// Lock lease as a [`Duration`].
    #[must_use]
    pub const fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `FANOUT_ENV`)
    /// 4. Environment variables with `FANOUT__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let env = std::env::var("FANOUT_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("FANOUT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("FANOUT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [database]
                url = "postgres://localhost/fanout"

                [redis]
                url = "redis://localhost:6379"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.redis.prefix, "fanout");
        assert_eq!(config.distribution.lock_lease(), Duration::from_secs(300));
        assert_eq!(config.references.max_retries, 3);
        assert!(!config.search.enabled);
        assert_eq!(config.queue.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_overrides() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [database]
                url = "postgres://localhost/fanout"

                [redis]
                url = "redis://localhost:6379"
                prefix = "test"

                [distribution]
                lock_lease_secs = 30
                home_feed_max = 100
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.redis.prefix, "test");
        assert_eq!(config.distribution.lock_lease(), Duration::from_secs(30));
        assert_eq!(config.distribution.home_feed_max, 100);
        assert_eq!(config.distribution.max_retries, 5);
    }
}
