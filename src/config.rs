use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Let sqlx statement logs through at info
    #[serde(default)]
    pub log_sql: bool,
    /// PostgreSQL connection URL. Without it the in-memory store is used.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// PostgreSQL pool settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 50,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// An account created at startup by the in-memory store
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeedAccount {
    pub owner: String,
    pub balance: i64,
    pub currency: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    /// Upper bound on one atomic unit. None = no deadline.
    pub tx_timeout_ms: Option<u64>,
    /// Row lock wait before the in-memory store reports a deadlock
    pub lock_timeout_ms: u64,
    pub seed_accounts: Vec<SeedAccount>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            tx_timeout_ms: None,
            lock_timeout_ms: 5_000,
            seed_accounts: Vec::new(),
        }
    }
}

impl LedgerConfig {
    pub fn tx_timeout(&self) -> Option<Duration> {
        self.tx_timeout_ms.map(Duration::from_millis)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
