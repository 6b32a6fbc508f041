//! Configuration for the economy engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Mailbox capacity of the single-writer actor (backpressure bound)
    pub mailbox_capacity: usize,

    /// Time budget per mutating operation (milliseconds)
    pub op_timeout_ms: u64,

    /// RocksDB tuning
    pub rocksdb: RocksDbConfig,

    /// Business rules of the ledger
    pub economy: EconomyRules,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/economy"),
            service_name: "economy-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            mailbox_capacity: 1024,
            op_timeout_ms: 5_000,
            rocksdb: RocksDbConfig::default(),
            economy: EconomyRules::default(),
        }
    }
}

/// RocksDB tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Ledger-level business rules, configured process-wide
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyRules {
    /// Display name of the smallest currency unit
    pub currency_unit: String,

    /// Maximum outbound transfer total per account inside the rolling window
    pub daily_transfer_limit: u64,

    /// Sliding window for the transfer cap (hours)
    pub transfer_window_hours: i64,

    /// Amount credited by a daily reward claim
    pub daily_reward_amount: u64,

    /// Fixed UTC offset (minutes) of the reference timezone used to compute
    /// the reward calendar day. Never taken from the caller.
    pub reward_utc_offset_minutes: i32,
}

impl Default for EconomyRules {
    fn default() -> Self {
        Self {
            currency_unit: "coins".to_string(),
            daily_transfer_limit: 10_000,
            transfer_window_hours: 24,
            daily_reward_amount: 50,
            reward_utc_offset_minutes: 0,
        }
    }
}

impl Config {
    /// Load from a TOML file; missing keys fall back to defaults
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load defaults with environment variable overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("ECONOMY_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(raw) = std::env::var("ECONOMY_OP_TIMEOUT_MS") {
            config.op_timeout_ms = raw
                .parse()
                .map_err(|_| crate::Error::Config(format!("invalid ECONOMY_OP_TIMEOUT_MS: {}", raw)))?;
        }

        if let Ok(raw) = std::env::var("ECONOMY_DAILY_TRANSFER_LIMIT") {
            config.economy.daily_transfer_limit = raw.parse().map_err(|_| {
                crate::Error::Config(format!("invalid ECONOMY_DAILY_TRANSFER_LIMIT: {}", raw))
            })?;
        }

        if let Ok(raw) = std::env::var("ECONOMY_DAILY_REWARD_AMOUNT") {
            config.economy.daily_reward_amount = raw.parse().map_err(|_| {
                crate::Error::Config(format!("invalid ECONOMY_DAILY_REWARD_AMOUNT: {}", raw))
            })?;
        }

        if let Ok(raw) = std::env::var("ECONOMY_REWARD_UTC_OFFSET_MINUTES") {
            config.economy.reward_utc_offset_minutes = raw.parse().map_err(|_| {
                crate::Error::Config(format!("invalid ECONOMY_REWARD_UTC_OFFSET_MINUTES: {}", raw))
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "economy-core");
        assert_eq!(config.economy.transfer_window_hours, 24);
        assert_eq!(config.economy.currency_unit, "coins");
        assert!(config.op_timeout_ms > 0);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let raw = r#"
            data_dir = "/tmp/economy-test"

            [economy]
            daily_transfer_limit = 250
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/economy-test"));
        assert_eq!(config.economy.daily_transfer_limit, 250);
        // Untouched keys keep their defaults
        assert_eq!(config.economy.daily_reward_amount, 50);
        assert_eq!(config.mailbox_capacity, 1024);
    }
}
