//! # Fan-out Writer
//!
//! Writes accounts, positions and trades in fixed-size batches. Each trade
//! is projected into every view of [`TRADE_VIEWS`]; for every chunk of
//! trades one batch per view is submitted, so all four view-writes of a
//! chunk are always attempted.
//!
//! Batches are independent and go out concurrently, at most
//! `max_in_flight` at a time, with no ordering between them. A substrate
//! batch is not a cross-partition transaction: when some batches fail the
//! call returns [`StoreError::Write`] listing every failed table and batch
//! index, and the batches that succeeded stay written. Nothing is retried
//! here.

use std::sync::Arc;

use futures_util::{stream, StreamExt};
use tracing::{debug, error, info, instrument};
use trade_views_core::{Account, Position, Trade};

use crate::config::WriterConfig;
use crate::error::{BatchFailure, StoreError, StoreResult, WriteFailure};
use crate::records::ViewRecord;
use crate::schema::{ACCOUNTS_BY_USER, POSITIONS_BY_ACCOUNT, TRADE_VIEWS};
use crate::session::{Batch, PreparedStatement, Session, Statement};

/// Outcome of a successful write operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Logical records written
    pub records: usize,
    /// Physical rows written, across all tables
    pub rows: usize,
    /// Batches submitted
    pub batches: usize,
}

/// One batch bound for one table
struct BatchJob {
    sequence: usize,
    table: &'static str,
    index: usize,
    batch: Batch,
}

/// Batched, multi-view writer
pub struct FanOutWriter {
    session: Arc<dyn Session>,
    config: WriterConfig,
    accounts: PreparedStatement,
    positions: PreparedStatement,
    trades: Vec<PreparedStatement>,
}

impl FanOutWriter {
    /// Prepares the insert statements for every table
    #[instrument(skip(session, config))]
    pub async fn new(session: Arc<dyn Session>, config: WriterConfig) -> StoreResult<Self> {
        if config.batch_size == 0 || config.max_in_flight == 0 {
            return Err(StoreError::Configuration(
                "batch size and in-flight limit must be positive".to_string(),
            ));
        }

        let accounts = session.prepare(Statement::insert(&ACCOUNTS_BY_USER)).await?;
        let positions = session
            .prepare(Statement::insert(&POSITIONS_BY_ACCOUNT))
            .await?;

        let mut trades = Vec::with_capacity(TRADE_VIEWS.len());
        for view in TRADE_VIEWS {
            trades.push(session.prepare(Statement::insert(view.schema())).await?);
        }

        debug!(
            batch_size = config.batch_size,
            max_in_flight = config.max_in_flight,
            "Fan-out writer ready"
        );

        Ok(Self {
            session,
            config,
            accounts,
            positions,
            trades,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Writes accounts to `accounts_by_user`
    #[instrument(skip(self, accounts), fields(count = accounts.len()))]
    pub async fn write_accounts(&self, accounts: &[Account]) -> StoreResult<WriteSummary> {
        let mut jobs = Vec::new();
        self.plan(&self.accounts, accounts, &mut jobs)?;
        self.dispatch(accounts.len(), jobs).await
    }

    /// Writes positions to `positions_by_account`.
    ///
    /// Input must already be free of duplicate `(account, symbol)` pairs.
    #[instrument(skip(self, positions), fields(count = positions.len()))]
    pub async fn write_positions(&self, positions: &[Position]) -> StoreResult<WriteSummary> {
        let mut jobs = Vec::new();
        self.plan(&self.positions, positions, &mut jobs)?;
        self.dispatch(positions.len(), jobs).await
    }

    /// Writes every trade to all trade views
    #[instrument(skip(self, trades), fields(count = trades.len()))]
    pub async fn write_trades(&self, trades: &[Trade]) -> StoreResult<WriteSummary> {
        for trade in trades {
            trade.validate()?;
        }

        let mut jobs = Vec::new();
        for statement in &self.trades {
            self.plan(statement, trades, &mut jobs)?;
        }
        self.dispatch(trades.len(), jobs).await
    }

    /// Splits `records` into batches for the statement's table
    fn plan<R: ViewRecord>(
        &self,
        statement: &PreparedStatement,
        records: &[R],
        jobs: &mut Vec<BatchJob>,
    ) -> StoreResult<()> {
        let table = statement.table();
        for (index, chunk) in records.chunks(self.config.batch_size).enumerate() {
            let mut batch = Batch::with_capacity(chunk.len());
            for record in chunk {
                batch.add(statement, record.project(table)?);
            }
            jobs.push(BatchJob {
                sequence: jobs.len(),
                table: table.name,
                index,
                batch,
            });
        }
        Ok(())
    }

    async fn dispatch(&self, records: usize, jobs: Vec<BatchJob>) -> StoreResult<WriteSummary> {
        if jobs.is_empty() {
            return Ok(WriteSummary::default());
        }

        let attempted = jobs.len();
        let session = &self.session;

        let mut results: Vec<(usize, BatchFailure)> = Vec::new();
        let mut rows = 0usize;

        let mut outcomes = stream::iter(jobs)
            .map(|job| async move {
                let size = job.batch.len();
                let outcome = session.execute_batch(job.batch).await;
                (job.sequence, job.table, job.index, size, outcome)
            })
            .buffer_unordered(self.config.max_in_flight);

        while let Some((sequence, table, index, size, outcome)) = outcomes.next().await {
            match outcome {
                Ok(()) => {
                    debug!(table, batch = index, rows = size, "Batch written");
                    rows += size;
                }
                Err(e) => {
                    error!(table, batch = index, "Batch write failed: {}", e);
                    results.push((
                        sequence,
                        BatchFailure {
                            table,
                            batch: index,
                            message: e.to_string(),
                        },
                    ));
                }
            }
        }

        if !results.is_empty() {
            results.sort_by_key(|(sequence, _)| *sequence);
            return Err(StoreError::Write(WriteFailure {
                attempted,
                failures: results.into_iter().map(|(_, failure)| failure).collect(),
            }));
        }

        info!(
            "Wrote {} records as {} rows in {} batches",
            records, rows, attempted
        );

        Ok(WriteSummary {
            records,
            rows,
            batches: attempted,
        })
    }
}
