//! TOML configuration.
//!
//! Only `[db]` is required; every other section falls back to defaults.
//! See [`load_config`] for the validation rules.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// `github` or `local`.
    #[serde(default = "default_client_kind")]
    pub kind: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable holding an optional API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Root directory for the `local` client: `<root>/<owner>/<name>/README.md`.
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            kind: default_client_kind(),
            api_url: default_api_url(),
            token_env: default_token_env(),
            local_root: None,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_client_kind() -> String {
    "github".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("awesome-index/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Server-requested waits longer than this fail the run instead.
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retry_after_secs: default_max_retry_after_secs(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_retry_after_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_index_batch_size")]
    pub index_batch_size: usize,
    #[serde(default = "default_purge_after_misses")]
    pub purge_after_misses: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            index_batch_size: default_index_batch_size(),
            purge_after_misses: default_purge_after_misses(),
        }
    }
}

fn default_max_in_flight() -> usize {
    4
}
fn default_index_batch_size() -> usize {
    100
}
fn default_purge_after_misses() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.client.kind.as_str() {
        "github" => {}
        "local" => {
            if config.client.local_root.is_none() {
                anyhow::bail!("client.local_root must be set when client.kind is 'local'");
            }
        }
        other => anyhow::bail!(
            "Unknown client kind: '{}'. Must be github or local.",
            other
        ),
    }

    if config.client.timeout_secs == 0 {
        anyhow::bail!("client.timeout_secs must be > 0");
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        anyhow::bail!("retry.base_delay_ms must be <= retry.max_delay_ms");
    }

    if config.sync.max_in_flight == 0 {
        anyhow::bail!("sync.max_in_flight must be >= 1");
    }
    if config.sync.index_batch_size == 0 {
        anyhow::bail!("sync.index_batch_size must be >= 1");
    }
    if config.sync.purge_after_misses == 0 {
        anyhow::bail!("sync.purge_after_misses must be >= 1");
    }

    Ok(config)
}
