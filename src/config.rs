//! Configuration management.
//!
//! Config is stored at `~/.config/debtctl/config.toml` (or an explicit path)
//! and contains:
//! - Ledger database location and encryption key
//! - Debt tier thresholds and aging periods
//! - Reconciliation loop intervals, pool size and sharding
//! - Suspension pipeline stages and controller backoff
//! - Object-storage admin credentials

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::debt::DebtThresholds;
use crate::ledger::TransferPolicy;
use crate::suspend::SuspendStage;
use crate::types::BASE_UNIT;

const CONFIG_DIR: &str = "debtctl";
const CONFIG_FILE: &str = "config.toml";
const DB_FILE: &str = "ledger.sqlite";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub debt: DebtConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub suspension: SuspensionConfig,

    #[serde(default)]
    pub object_storage: ObjectStorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// SQLite database path (default: `<config dir>/ledger.sqlite`).
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Secret the balance cipher key is derived from.
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// Smallest amount a transfer may move, in ledger units.
    #[serde(default = "default_min_transfer_amount")]
    pub min_transfer_amount: i64,

    /// Transferable balance the source must keep after a transfer.
    #[serde(default = "default_min_reserve")]
    pub min_reserve: i64,

    /// Pending transfers older than this are expired.
    #[serde(default = "default_transfer_expiry_secs")]
    pub transfer_expiry_secs: u64,
}

fn default_min_transfer_amount() -> i64 {
    BASE_UNIT
}

fn default_min_reserve() -> i64 {
    10 * BASE_UNIT
}

fn default_transfer_expiry_secs() -> u64 {
    30 * 60
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            encryption_key: None,
            min_transfer_amount: default_min_transfer_amount(),
            min_reserve: default_min_reserve(),
            transfer_expiry_secs: default_transfer_expiry_secs(),
        }
    }
}

impl LedgerConfig {
    pub fn transfer_expiry(&self) -> Duration {
        Duration::from_secs(self.transfer_expiry_secs)
    }

    pub fn policy(&self) -> TransferPolicy {
        TransferPolicy {
            min_amount: self.min_transfer_amount,
            min_reserve: self.min_reserve,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtConfig {
    #[serde(default = "default_high_threshold")]
    pub high_threshold: i64,

    #[serde(default = "default_mid_threshold")]
    pub mid_threshold: i64,

    #[serde(default)]
    pub deletion_threshold: i64,

    /// Time spent in `Debt` before moving to `DebtDeletion`.
    #[serde(default = "default_period_secs")]
    pub debt_deletion_period_secs: u64,

    /// Time spent in `DebtDeletion` before moving to `FinalDeletion`.
    #[serde(default = "default_period_secs")]
    pub final_deletion_period_secs: u64,
}

fn default_high_threshold() -> i64 {
    10 * BASE_UNIT
}

fn default_mid_threshold() -> i64 {
    5 * BASE_UNIT
}

fn default_period_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for DebtConfig {
    fn default() -> Self {
        Self {
            high_threshold: default_high_threshold(),
            mid_threshold: default_mid_threshold(),
            deletion_threshold: 0,
            debt_deletion_period_secs: default_period_secs(),
            final_deletion_period_secs: default_period_secs(),
        }
    }
}

impl DebtConfig {
    pub fn thresholds(&self) -> DebtThresholds {
        DebtThresholds {
            high: self.high_threshold,
            mid: self.mid_threshold,
            deletion: self.deletion_threshold,
            debt_deletion_period: Duration::from_secs(self.debt_deletion_period_secs),
            final_deletion_period: Duration::from_secs(self.final_deletion_period_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_activity_interval_secs")]
    pub activity_interval_secs: u64,

    /// Window covered by the first activity scan after startup.
    #[serde(default = "default_initial_lookback_secs")]
    pub initial_lookback_secs: u64,

    /// The first scan stops this far before now to let in-flight writes land.
    #[serde(default = "default_activity_lag_secs")]
    pub activity_lag_secs: u64,

    #[serde(default = "default_aging_interval_secs")]
    pub aging_interval_secs: u64,

    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    #[serde(default = "default_expiry_interval_secs")]
    pub expiry_interval_secs: u64,

    /// Max tenants processed concurrently.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Failed tenants are abandoned after this many attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub shard_index: u64,

    #[serde(default = "default_shard_count")]
    pub shard_count: u64,

    /// Timeout applied to every cluster API call.
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
}

fn default_activity_interval_secs() -> u64 {
    60
}

fn default_initial_lookback_secs() -> u64 {
    24 * 60 * 60
}

fn default_activity_lag_secs() -> u64 {
    2 * 60
}

fn default_aging_interval_secs() -> u64 {
    5 * 60
}

fn default_retry_interval_secs() -> u64 {
    60
}

fn default_expiry_interval_secs() -> u64 {
    5 * 60
}

fn default_pool_size() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_shard_count() -> u64 {
    1
}

fn default_api_timeout_secs() -> u64 {
    30
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            activity_interval_secs: default_activity_interval_secs(),
            initial_lookback_secs: default_initial_lookback_secs(),
            activity_lag_secs: default_activity_lag_secs(),
            aging_interval_secs: default_aging_interval_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            expiry_interval_secs: default_expiry_interval_secs(),
            pool_size: default_pool_size(),
            max_attempts: default_max_attempts(),
            shard_index: 0,
            shard_count: default_shard_count(),
            api_timeout_secs: default_api_timeout_secs(),
        }
    }
}

impl ReconcileConfig {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionConfig {
    /// Suspend pipeline, in execution order.
    #[serde(default = "default_stages")]
    pub stages: Vec<SuspendStage>,

    #[serde(default = "default_debt_scheduler")]
    pub debt_scheduler: String,

    #[serde(default = "default_paused_ingress_class")]
    pub paused_ingress_class: String,

    #[serde(default = "default_ingress_class")]
    pub default_ingress_class: String,

    /// Requeue delay after a failed delete.
    #[serde(default = "default_delete_backoff_secs")]
    pub delete_backoff_secs: u64,

    /// Requeue delay after a failed suspend or resume.
    #[serde(default = "default_action_backoff_secs")]
    pub action_backoff_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Attempts for an optimistic-concurrency update before giving up.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

fn default_stages() -> Vec<SuspendStage> {
    SuspendStage::DEFAULT_ORDER.to_vec()
}

fn default_debt_scheduler() -> String {
    "sealos-debt-scheduler".to_string()
}

fn default_paused_ingress_class() -> String {
    "pause".to_string()
}

fn default_ingress_class() -> String {
    "nginx".to_string()
}

fn default_delete_backoff_secs() -> u64 {
    10
}

fn default_action_backoff_secs() -> u64 {
    60
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_conflict_retries() -> u32 {
    5
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            debt_scheduler: default_debt_scheduler(),
            paused_ingress_class: default_paused_ingress_class(),
            default_ingress_class: default_ingress_class(),
            delete_backoff_secs: default_delete_backoff_secs(),
            action_backoff_secs: default_action_backoff_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// Admin endpoint; object-storage stages are skipped when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,
}

impl ObjectStorageConfig {
    pub fn secret_key_secret(&self) -> Option<SecretString> {
        self.secret_key.clone().map(SecretString::from)
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.is_empty())
    }
}

impl Config {
    /// Load config from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;

        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debt.mid_threshold > self.debt.high_threshold {
            return Err(ConfigError::Invalid(
                "debt.mid_threshold must not exceed debt.high_threshold".to_string(),
            ));
        }
        if self.debt.deletion_threshold < 0 {
            return Err(ConfigError::Invalid(
                "debt.deletion_threshold must not be negative".to_string(),
            ));
        }
        if self.ledger.min_transfer_amount <= 0 {
            return Err(ConfigError::Invalid(
                "ledger.min_transfer_amount must be positive".to_string(),
            ));
        }
        if self.reconcile.shard_count == 0 || self.reconcile.shard_index >= self.reconcile.shard_count
        {
            return Err(ConfigError::Invalid(format!(
                "reconcile.shard_index {} out of range for shard_count {}",
                self.reconcile.shard_index, self.reconcile.shard_count
            )));
        }
        if self.reconcile.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "reconcile.pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the encryption key, preferring an explicit override (CLI flag or env).
    pub fn encryption_key(&self, overridden: Option<&str>) -> Result<SecretString, ConfigError> {
        overridden
            .map(str::to_string)
            .or_else(|| self.ledger.encryption_key.clone())
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| {
                ConfigError::Invalid(
                    "no ledger encryption key (set ledger.encryption_key or DEBTCTL_ENCRYPTION_KEY)"
                        .to_string(),
                )
            })
    }

    pub fn set_encryption_key(&mut self, key: String) {
        self.ledger.encryption_key = Some(key);
    }

    /// Ledger database path, defaulting next to the config file.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.ledger.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join(DB_FILE)),
        }
    }

    /// Get the config file path.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Get the config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;

        Ok(config_dir.join(CONFIG_DIR))
    }
}
