// Runtime configuration, read from the environment after `.env` is loaded.

use crate::core::market::MarketConfig;
use crate::infra::market::DEFAULT_WRITE_RETRIES;
use std::path::PathBuf;

const DEFAULT_DATABASE_PATH: &str = "data/market.db";

/// Which store implementation backs the market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: StoreBackend,
    pub database_path: String,
    /// JSON seed file used when the store starts empty. Built-in demo data otherwise.
    pub seed_file: Option<PathBuf>,
    pub write_retries: u32,
    pub market: MarketConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let backend = match lookup("MARKET_STORE").as_deref() {
            None | Some("sqlite") => StoreBackend::Sqlite,
            Some("memory") => StoreBackend::Memory,
            Some(other) => anyhow::bail!("MARKET_STORE must be sqlite or memory, got {}", other),
        };

        let write_retries = match lookup("MARKET_WRITE_RETRIES") {
            Some(v) => v
                .parse::<u32>()
                .map_err(|e| anyhow::anyhow!("MARKET_WRITE_RETRIES: {}", e))?,
            None => DEFAULT_WRITE_RETRIES,
        };

        let mut market = MarketConfig::default();
        if let Some(v) = lookup("MARKET_ROLLBACK_FAILED_SALES") {
            market.rollback_failed_sales = v
                .parse::<bool>()
                .map_err(|e| anyhow::anyhow!("MARKET_ROLLBACK_FAILED_SALES: {}", e))?;
        }

        Ok(Self {
            backend,
            database_path: lookup("MARKET_DATABASE_PATH")
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            seed_file: lookup("MARKET_SEED_FILE").map(PathBuf::from),
            write_retries,
            market,
        })
    }
}
