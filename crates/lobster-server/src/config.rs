use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use lobster_dispatch::RetryPolicy;
use lobster_tasks::{Listing, TaskEngineConfig};
use lobster_types::{AccountId, Capability};
use lobster_wallet::CommissionPolicy;

/// Top-level configuration for the marketplace server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobsterConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Overridden by `--state-dir` / `$LOBSTER_STATE_DIR`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Platform commission in basis points (`500` = 5%).
    #[serde(default = "default_commission_bps")]
    pub commission_bps: u32,

    /// Account that receives commission.
    #[serde(default)]
    pub platform_account: AccountId,

    /// How long a seller has to accept a submitted task.
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,

    /// Execution window when the buyer does not ask for one.
    #[serde(default = "default_task_timeout_secs")]
    pub default_task_timeout_secs: u64,

    #[serde(default = "default_max_task_timeout_secs")]
    pub max_task_timeout_secs: u64,

    #[serde(default = "default_quote_ttl_secs")]
    pub quote_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Claimed poll items not acked within this window are handed out again.
    #[serde(default = "default_poll_lease_secs")]
    pub poll_lease_secs: u64,

    /// Requests per account per minute. `0` disables limiting.
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    /// Frozen funds with no task behind them are refunded after this long.
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,

    /// "text" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,

    #[serde(default)]
    pub listings: Vec<Listing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// A credential and the principal it resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub account: AccountId,
    #[serde(default = "default_capability")]
    pub capability: Capability,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_commission_bps() -> u32 {
    500
}

fn default_submit_timeout_secs() -> u64 {
    300
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_max_task_timeout_secs() -> u64 {
    86_400
}

fn default_quote_ttl_secs() -> u64 {
    1_800
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_poll_lease_secs() -> u64 {
    60
}

fn default_rate_limit_per_minute() -> u32 {
    600
}

fn default_orphan_grace_secs() -> u64 {
    60
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_capability() -> Capability {
    Capability::CallAndRead
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl WebhookConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for LobsterConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            state_dir: None,
            commission_bps: default_commission_bps(),
            platform_account: AccountId::nil(),
            submit_timeout_secs: default_submit_timeout_secs(),
            default_task_timeout_secs: default_task_timeout_secs(),
            max_task_timeout_secs: default_max_task_timeout_secs(),
            quote_ttl_secs: default_quote_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            poll_lease_secs: default_poll_lease_secs(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            orphan_grace_secs: default_orphan_grace_secs(),
            log_format: default_log_format(),
            webhook: WebhookConfig::default(),
            api_keys: Vec::new(),
            listings: Vec::new(),
        }
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

impl LobsterConfig {
    /// Config file path within the state directory.
    pub fn config_path(state_dir: &Path) -> PathBuf {
        state_dir.join("config.toml")
    }

    /// Default state directory: `$LOBSTER_STATE_DIR` or `~/.lobster/`.
    pub fn default_state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("LOBSTER_STATE_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".lobster")
        }
    }

    /// Load config from disk. Returns default if not found.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = Self::config_path(state_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to disk.
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let path = Self::config_path(state_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn commission(&self) -> CommissionPolicy {
        CommissionPolicy::new(self.commission_bps, self.platform_account)
    }

    pub fn task_engine(&self) -> TaskEngineConfig {
        TaskEngineConfig {
            submit_timeout: secs(self.submit_timeout_secs),
            default_timeout_secs: self.default_task_timeout_secs,
            max_timeout_secs: self.max_task_timeout_secs,
            orphan_grace: secs(self.orphan_grace_secs),
            ..TaskEngineConfig::default()
        }
    }

    pub fn quote_ttl(&self) -> chrono::Duration {
        secs(self.quote_ttl_secs)
    }

    pub fn poll_lease(&self) -> chrono::Duration {
        secs(self.poll_lease_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
