//! Configuration for the resource economy

use crate::types::{AccountName, Symbol};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Economy parameters
    pub economy: EconomyConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Actor runtime configuration
    pub runtime: RuntimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/resources"),
            service_name: "resource-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            economy: EconomyConfig::default(),
            rocksdb: RocksDBConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Parameters of the staking and RAM economy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    /// Delay between the last unstake and a claimable refund (seconds)
    pub refund_delay_secs: u32,

    /// Privileged system account (account creation, RAM capacity)
    pub system_account: AccountName,

    /// Pool holding all staked and pending-refund tokens
    pub stake_account: AccountName,

    /// Core token symbol
    pub core_symbol: Symbol,

    /// Initial RAM capacity (bytes), used when no global row is persisted
    pub max_ram_size: u64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            refund_delay_secs: 3 * 24 * 3600, // 3 days
            system_account: AccountName::new_unchecked("eosio"),
            stake_account: AccountName::new_unchecked("eosio.stake"),
            core_symbol: Symbol::new_unchecked("SYS", 4),
            max_ram_size: 64 * 1024 * 1024 * 1024, // 64 GiB
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Actor runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Bounded mailbox size (backpressure)
    pub mailbox_capacity: usize,

    /// Persist committed transitions to RocksDB
    pub persist: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            persist: true,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("RESOURCE_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(delay) = std::env::var("RESOURCE_REFUND_DELAY_SECS") {
            config.economy.refund_delay_secs = delay.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid RESOURCE_REFUND_DELAY_SECS: {}", e))
            })?;
        }

        if let Ok(size) = std::env::var("RESOURCE_MAX_RAM_SIZE") {
            config.economy.max_ram_size = size.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid RESOURCE_MAX_RAM_SIZE: {}", e))
            })?;
        }

        if let Ok(persist) = std::env::var("RESOURCE_PERSIST") {
            config.runtime.persist = persist == "1" || persist.eq_ignore_ascii_case("true");
        }

        Ok(config)
    }
}
