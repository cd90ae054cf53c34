//! Feed pipeline and scheduler configuration, loaded from TOML.

use crate::job::FeedKind;
use serde::{Deserialize, Serialize};
use shop_core::EngineConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("parsing {}: {source}", .path.display())]
    Toml { path: PathBuf, source: toml::de::Error },
}

/// Download and parse limits for a single feed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Hard ceiling on feed body size.
    #[serde(default = "default_max_feed_bytes")]
    pub max_feed_bytes: u64,

    /// A feed with more records than this fails to parse.
    #[serde(default = "default_max_products")]
    pub max_products: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_download_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_feed_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_max_products() -> usize {
    1_000_000
}

fn default_user_agent() -> String {
    concat!("shop-indexer/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: default_download_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_feed_bytes: default_max_feed_bytes(),
            max_products: default_max_products(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Feed runs allowed at once across all projects.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_full_interval")]
    pub full_interval_secs: u64,

    #[serde(default = "default_delta_interval")]
    pub delta_interval_secs: u64,

    /// First retry delay after a download failure; doubles per consecutive failure.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,

    /// Consecutive failures before a feed is flagged as alerting.
    #[serde(default = "default_alert_after")]
    pub alert_after: u32,

    /// How often query-suggestion popularity decays.
    #[serde(default = "default_decay_interval")]
    pub decay_interval_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_full_interval() -> u64 {
    3600
}

fn default_delta_interval() -> u64 {
    300
}

fn default_backoff_base() -> u64 {
    30
}

fn default_backoff_cap() -> u64 {
    3600
}

fn default_alert_after() -> u32 {
    3
}

fn default_decay_interval() -> u64 {
    3600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            full_interval_secs: default_full_interval(),
            delta_interval_secs: default_delta_interval(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            alert_after: default_alert_after(),
            decay_interval_secs: default_decay_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn default_interval(&self, kind: FeedKind) -> Duration {
        Duration::from_secs(match kind {
            FeedKind::Full => self.full_interval_secs,
            FeedKind::Delta => self.delta_interval_secs,
        })
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_secs(self.decay_interval_secs.max(1))
    }
}

/// A feed job as written in the config file. Format and source are checked on registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedJobSpec {
    /// Defaults to `{project}-{kind}`.
    #[serde(default)]
    pub id: Option<String>,
    pub project: String,
    pub kind: FeedKind,
    pub source: String,
    pub format: String,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

/// Everything a binary needs: engine tuning, feed limits, scheduler policy and the job list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub feed: FeedConfig,
    pub scheduler: SchedulerConfig,
    /// sled directory; in-memory only when unset.
    pub store_path: Option<PathBuf>,
    pub jobs: Vec<FeedJobSpec>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Toml { path: path.to_path_buf(), source })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
