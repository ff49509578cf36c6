//! # Trade Store
//!
//! Entry point for callers: bootstraps the keyspace and the six tables on
//! the chosen substrate, then serves bulk loading and lookups through the
//! fan-out writer and query router.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, instrument};
use trade_views_core::{Account, Position};

use crate::config::{Backend, StoreConfig};
use crate::error::StoreResult;
use crate::loader::{BulkLoader, LoadPlan, LoadSummary};
use crate::memory::MemorySession;
use crate::postgres::PgSession;
use crate::router::{DateWindow, QueryRouter, TradeQuery, TradeStream};
use crate::schema::all_tables;
use crate::session::Session;
use crate::writer::FanOutWriter;

pub struct TradeStore {
    session: Arc<dyn Session>,
    config: StoreConfig,
    writer: FanOutWriter,
    router: QueryRouter,
}

impl TradeStore {
    /// Opens the substrate selected by `config.backend`
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let session: Arc<dyn Session> = match config.backend {
            Backend::Memory => Arc::new(MemorySession::new(
                config.keyspace.name.clone(),
                config.query.page_size,
            )),
            Backend::Postgres => {
                Arc::new(PgSession::connect(&config.database, &config.keyspace.name).await?)
            }
        };
        Self::open(session, config).await
    }

    /// Bootstraps `session` and prepares every statement
    #[instrument(skip(session, config), fields(keyspace = session.keyspace()))]
    pub async fn open(session: Arc<dyn Session>, config: StoreConfig) -> StoreResult<Self> {
        Self::bootstrap(session.as_ref(), config.keyspace.replication_factor).await?;

        let writer = FanOutWriter::new(session.clone(), config.writer.clone()).await?;
        let router = QueryRouter::new(session.clone(), config.query.clone()).await?;

        info!("Trade store ready");

        Ok(Self {
            session,
            config,
            writer,
            router,
        })
    }

    /// Creates the keyspace and every table if absent
    pub async fn bootstrap(session: &dyn Session, replication_factor: u32) -> StoreResult<()> {
        session.create_keyspace(replication_factor).await?;
        for table in all_tables() {
            session.create_table(table).await?;
        }
        info!("Created {} tables", all_tables().len());
        Ok(())
    }

    /// Generates and writes synthetic data over the configured trade dates
    pub async fn bulk_load(
        &self,
        accounts: usize,
        positions: usize,
        trades: usize,
    ) -> StoreResult<LoadSummary> {
        let plan = LoadPlan {
            accounts,
            positions,
            trades,
            ..LoadPlan::from(&self.config.loader)
        };
        let mut rng = StdRng::from_entropy();
        self.bulk_load_with(&plan, &mut rng).await
    }

    /// Like [`Self::bulk_load`] with an explicit plan and random source
    pub async fn bulk_load_with<R: Rng>(
        &self,
        plan: &LoadPlan,
        rng: &mut R,
    ) -> StoreResult<LoadSummary> {
        BulkLoader::new(&self.writer).load(plan, rng).await
    }

    pub async fn list_accounts(&self, username: &str) -> StoreResult<Vec<Account>> {
        self.router.list_accounts(username).await
    }

    pub async fn list_positions(&self, account: &str) -> StoreResult<Vec<Position>> {
        self.router.list_positions(account).await
    }

    pub async fn find_trades(
        &self,
        account: &str,
        query: &TradeQuery,
        window: DateWindow,
    ) -> StoreResult<TradeStream> {
        self.router.find_trades(account, query, window).await
    }

    pub fn writer(&self) -> &FanOutWriter {
        &self.writer
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ACCOUNTS_BY_USER, TRADE_VIEWS};
    use futures_util::TryStreamExt;

    #[tokio::test]
    async fn test_connect_memory_backend_bootstraps_tables() {
        let store = TradeStore::connect(StoreConfig::default()).await.unwrap();
        assert_eq!(store.session().keyspace(), "investments");
        assert!(store.list_accounts("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let memory = MemorySession::new("investments", 10);
        TradeStore::bootstrap(&memory, 1).await.unwrap();
        TradeStore::bootstrap(&memory, 1).await.unwrap();
        assert_eq!(memory.row_count(&ACCOUNTS_BY_USER), 0);
    }

    #[tokio::test]
    async fn test_bulk_load_populates_every_view() {
        let memory = MemorySession::new("investments", 25);
        let store = TradeStore::open(Arc::new(memory.clone()), StoreConfig::default())
            .await
            .unwrap();

        let summary = store.bulk_load(3, 12, 40).await.unwrap();
        assert_eq!(summary.accounts.records, 3);
        assert_eq!(summary.positions.records, 12);
        assert_eq!(summary.trades.rows, 160);
        for view in TRADE_VIEWS {
            assert_eq!(memory.row_count(view.schema()), 40);
        }

        let account = {
            let mut found = Vec::new();
            for (username, _) in crate::loader::USERS {
                found.extend(store.list_accounts(username).await.unwrap());
            }
            assert_eq!(found.len(), 3);
            found.remove(0).account_number
        };
        let trades: Vec<_> = store
            .find_trades(&account, &TradeQuery::ByDate, DateWindow::Unbounded)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(trades.iter().all(|t| t.account_number == account));
    }
}
