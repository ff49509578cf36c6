//! # Store Configuration
//!
//! Configuration for the storage substrate, keyspace bootstrap, write
//! batching, query paging and the synthetic loader. Values are layered from
//! defaults, optional TOML files and `TRADE_VIEWS__*` environment variables.

use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::router::MAX_TRADE_WINDOW_DAYS;

/// Storage substrate selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process sorted map; contents live as long as the process
    Memory,
    /// PostgreSQL tables laid out per view
    Postgres,
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// Connection acquisition timeout, in seconds
    pub acquire_timeout_secs: u64,
    /// Connection idle timeout, in seconds
    pub idle_timeout_secs: u64,
    /// Connection max lifetime, in seconds
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/investments".to_string()),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

/// Keyspace created at bootstrap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyspaceConfig {
    pub name: String,
    pub replication_factor: u32,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self {
            name: "investments".to_string(),
            replication_factor: 1,
        }
    }
}

/// Fan-out writer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Rows per batch statement
    pub batch_size: usize,
    /// Batches submitted concurrently
    pub max_in_flight: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_in_flight: 4,
        }
    }
}

/// Query router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Rows fetched from the substrate per page
    pub page_size: usize,
    /// Days covered by the default trade window
    pub default_window_days: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            default_window_days: 30,
        }
    }
}

/// Synthetic loader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub accounts: usize,
    pub positions: usize,
    pub trades: usize,
    /// First day trades may fall on
    pub trades_from: NaiveDate,
    /// Day after the last day trades may fall on
    pub trades_until: NaiveDate,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            accounts: 10,
            positions: 100,
            trades: 1000,
            trades_from: NaiveDate::from_ymd_opt(2013, 1, 1).unwrap_or_default(),
            trades_until: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
        }
    }
}

/// Master configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    pub database: DatabaseConfig,
    pub keyspace: KeyspaceConfig,
    pub writer: WriterConfig,
    pub query: QueryConfig,
    pub loader: LoaderConfig,
    /// Environment (development, staging, production)
    pub environment: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            database: DatabaseConfig::default(),
            keyspace: KeyspaceConfig::default(),
            writer: WriterConfig::default(),
            query: QueryConfig::default(),
            loader: LoaderConfig::default(),
            environment: "development".to_string(),
        }
    }
}

impl StoreConfig {
    /// Loads configuration, reading `path` before the default file locations
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name("trade-views").required(false))
            .add_source(File::with_name("config/trade-views").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("TRADE_VIEWS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let store_config: StoreConfig = config.try_deserialize()?;
        info!(
            backend = ?store_config.backend,
            keyspace = %store_config.keyspace.name,
            "Store configuration loaded"
        );
        Ok(store_config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == Backend::Postgres && self.database.database_url.is_empty() {
            return Err(anyhow::anyhow!("Database URL cannot be empty"));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "Max connections must be >= min connections"
            ));
        }

        if self.keyspace.name.is_empty()
            || !self
                .keyspace
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(anyhow::anyhow!(
                "Keyspace name must be non-empty and contain only [A-Za-z0-9_]"
            ));
        }

        if self.keyspace.replication_factor == 0 {
            return Err(anyhow::anyhow!("Replication factor must be at least 1"));
        }

        if self.writer.batch_size == 0 || self.writer.max_in_flight == 0 {
            return Err(anyhow::anyhow!(
                "Writer batch size and in-flight limit must be positive"
            ));
        }

        if self.query.page_size == 0 {
            return Err(anyhow::anyhow!("Query page size must be positive"));
        }

        if !(1..=MAX_TRADE_WINDOW_DAYS).contains(&self.query.default_window_days) {
            return Err(anyhow::anyhow!(
                "Default trade window must be between 1 and {} days",
                MAX_TRADE_WINDOW_DAYS
            ));
        }

        if self.loader.trades_until <= self.loader.trades_from {
            return Err(anyhow::anyhow!(
                "Loader trade date range must end after it starts"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.writer.batch_size, 10);
        assert_eq!(config.query.default_window_days, 30);
        assert_eq!(config.keyspace.name, "investments");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = StoreConfig::default();
        config.writer.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.keyspace.name = "bad-name; DROP".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_window_days_bounded() {
        let mut config = StoreConfig::default();
        config.query.default_window_days = 0;
        assert!(config.validate().is_err());

        config.query.default_window_days = u32::MAX;
        assert!(config.validate().is_err());

        config.query.default_window_days = MAX_TRADE_WINDOW_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "backend = \"postgres\"\n[writer]\nbatch_size = 25\n[keyspace]\nname = \"ledger\""
        )
        .unwrap();

        let config = StoreConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.backend, Backend::Postgres);
        assert_eq!(config.writer.batch_size, 25);
        assert_eq!(config.writer.max_in_flight, 4);
        assert_eq!(config.keyspace.name, "ledger");
    }
}
