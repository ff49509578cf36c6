//! # In-Memory Substrate
//!
//! A partitioned, sorted-map store held in process memory. Rows live in a
//! hash map of partitions; inside a partition they are kept in a `BTreeMap`
//! ordered by the table's clustering key, honouring each column's
//! ascending/descending direction. Scans are served page by page, so a
//! consumer that stops reading never materializes the rest of the partition.
//!
//! Inserts are upserts on the primary key. Static columns hold one value per
//! partition and are merged into every row on read. A batch is applied under
//! a single write lock.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{StoreError, StoreResult};
use crate::schema::{ClusteringOrder, ViewSchema};
use crate::session::{
    Batch, PreparedStatement, Row, RowStream, Session, Statement, StatementKind, Value,
};

/// Clustering key with per-column direction
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClusteringKey(Vec<(Value, ClusteringOrder)>);

impl Ord for ClusteringKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((left, order), (right, _)) in self.0.iter().zip(&other.0) {
            let ordering = match order {
                ClusteringOrder::Asc => left.cmp(right),
                ClusteringOrder::Desc => right.cmp(left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for ClusteringKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct Partition {
    statics: BTreeMap<&'static str, Value>,
    rows: BTreeMap<ClusteringKey, BTreeMap<&'static str, Value>>,
}

#[derive(Debug)]
struct MemTable {
    schema: &'static ViewSchema,
    partitions: HashMap<Vec<Value>, Partition>,
}

impl MemTable {
    fn new(schema: &'static ViewSchema) -> Self {
        Self {
            schema,
            partitions: HashMap::new(),
        }
    }

    fn upsert(&mut self, params: Vec<Value>) {
        let schema = self.schema;
        let mut values: HashMap<&'static str, Value> = schema
            .columns
            .iter()
            .map(|c| c.name)
            .zip(params)
            .collect();

        let partition_key: Vec<Value> = schema
            .partition_key
            .iter()
            .filter_map(|name| values.remove(name))
            .collect();
        let clustering_key = ClusteringKey(
            schema
                .clustering
                .iter()
                .filter_map(|c| values.remove(c.name).map(|v| (v, c.order)))
                .collect(),
        );

        let partition = self.partitions.entry(partition_key).or_default();
        let mut regular = BTreeMap::new();
        for (name, value) in values {
            if schema.is_static(name) {
                partition.statics.insert(name, value);
            } else {
                regular.insert(name, value);
            }
        }
        partition.rows.insert(clustering_key, regular);
    }

    fn row(
        &self,
        partition_key: &[Value],
        partition: &Partition,
        key: &ClusteringKey,
        regular: &BTreeMap<&'static str, Value>,
    ) -> Row {
        let mut row = Row::new();
        for (name, value) in self.schema.partition_key.iter().zip(partition_key) {
            row.insert(*name, value.clone());
        }
        for (column, (value, _)) in self.schema.clustering.iter().zip(&key.0) {
            row.insert(column.name, value.clone());
        }
        for (name, value) in &partition.statics {
            row.insert(*name, value.clone());
        }
        for (name, value) in regular {
            row.insert(*name, value.clone());
        }
        row
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    keyspaces: HashMap<String, u32>,
    tables: HashMap<&'static str, MemTable>,
    failing_tables: HashSet<&'static str>,
}

/// One page of a scan
struct Page {
    rows: Vec<Row>,
    last_key: Option<ClusteringKey>,
    exhausted: bool,
}

/// In-process implementation of [`Session`]
#[derive(Clone)]
pub struct MemorySession {
    keyspace: String,
    page_size: usize,
    state: Arc<RwLock<MemoryState>>,
    statements_prepared: Arc<AtomicU64>,
}

impl MemorySession {
    /// Creates an empty substrate bound to `keyspace`
    pub fn new(keyspace: impl Into<String>, page_size: usize) -> Self {
        Self {
            keyspace: keyspace.into(),
            page_size: page_size.max(1),
            state: Arc::new(RwLock::new(MemoryState::default())),
            statements_prepared: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Makes every later batch touching `table` fail, to exercise partial
    /// fan-out handling.
    pub fn fail_writes_to(&self, table: &'static ViewSchema) {
        self.state.write().failing_tables.insert(table.name);
    }

    /// Clears injected write failures
    pub fn heal(&self) {
        self.state.write().failing_tables.clear();
    }

    /// Number of rows stored in `table`
    pub fn row_count(&self, table: &ViewSchema) -> usize {
        self.state
            .read()
            .tables
            .get(table.name)
            .map(|t| t.partitions.values().map(|p| p.rows.len()).sum())
            .unwrap_or(0)
    }

    /// Number of statements prepared so far
    pub fn statements_prepared(&self) -> u64 {
        self.statements_prepared.load(AtomicOrdering::Relaxed)
    }

    fn check_table(state: &MemoryState, table: &ViewSchema) -> StoreResult<()> {
        if state.tables.contains_key(table.name) {
            Ok(())
        } else {
            Err(StoreError::Storage(format!("unconfigured table {}", table.name)))
        }
    }

    fn read_page(
        state: &RwLock<MemoryState>,
        statement: &Statement,
        params: &[Value],
        after: Option<&ClusteringKey>,
        page_size: usize,
    ) -> StoreResult<Page> {
        let StatementKind::Select { equals, range } = &statement.kind else {
            return Ok(Page {
                rows: Vec::new(),
                last_key: None,
                exhausted: true,
            });
        };

        let state = state.read();
        let table = state
            .tables
            .get(statement.table.name)
            .ok_or_else(|| {
                StoreError::Storage(format!("unconfigured table {}", statement.table.name))
            })?;

        let partition_len = statement.table.partition_key.len();
        let partition_key = &params[..partition_len];
        let prefix = &params[partition_len..equals.len()];
        let bounds = range.map(|_| (&params[equals.len()], &params[equals.len() + 1]));

        let Some(partition) = table.partitions.get(partition_key) else {
            return Ok(Page {
                rows: Vec::new(),
                last_key: None,
                exhausted: true,
            });
        };

        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        let mut rows = Vec::new();
        let mut last_key = None;
        let mut matched_prefix = false;
        let mut exhausted = true;

        for (key, regular) in partition.rows.range::<ClusteringKey, _>((lower, Bound::Unbounded)) {
            let prefix_matches = key
                .0
                .iter()
                .zip(prefix)
                .all(|((value, _), wanted)| value == wanted);
            if !prefix_matches {
                // Rows sharing a clustering prefix are contiguous.
                if matched_prefix {
                    break;
                }
                continue;
            }
            matched_prefix = true;

            if rows.len() == page_size {
                exhausted = false;
                break;
            }
            last_key = Some(key.clone());

            if let Some((low, high)) = bounds {
                let value = &key.0[prefix.len()].0;
                if value < low || value > high {
                    continue;
                }
            }

            rows.push(table.row(partition_key, partition, key, regular));
        }

        Ok(Page {
            rows,
            last_key,
            exhausted,
        })
    }
}

#[async_trait]
impl Session for MemorySession {
    fn keyspace(&self) -> &str {
        &self.keyspace
    }

    #[instrument(skip(self), fields(keyspace = %self.keyspace))]
    async fn create_keyspace(&self, replication_factor: u32) -> StoreResult<()> {
        let mut state = self.state.write();
        state
            .keyspaces
            .entry(self.keyspace.clone())
            .or_insert(replication_factor);
        info!("Keyspace ready with replication factor {}", replication_factor);
        Ok(())
    }

    #[instrument(skip(self, table), fields(table = table.name))]
    async fn create_table(&self, table: &'static ViewSchema) -> StoreResult<()> {
        let mut state = self.state.write();
        if !state.keyspaces.contains_key(&self.keyspace) {
            return Err(StoreError::Storage(format!(
                "keyspace {} does not exist",
                self.keyspace
            )));
        }
        state
            .tables
            .entry(table.name)
            .or_insert_with(|| MemTable::new(table));
        debug!("{}", table.create_table_cql(&self.keyspace));
        Ok(())
    }

    #[instrument(skip(self, statement), fields(table = statement.table.name))]
    async fn prepare(&self, statement: Statement) -> StoreResult<PreparedStatement> {
        Self::check_table(&self.state.read(), statement.table)?;
        let text = statement.cql(&self.keyspace);
        self.statements_prepared.fetch_add(1, AtomicOrdering::Relaxed);
        debug!("Prepared: {}", text);
        Ok(PreparedStatement::new(statement, text))
    }

    #[instrument(skip(self, statement, params), fields(table = statement.table().name))]
    async fn execute(
        &self,
        statement: &PreparedStatement,
        params: Vec<Value>,
    ) -> StoreResult<RowStream> {
        statement.statement().check_params(&params)?;

        if statement.statement().kind == StatementKind::Insert {
            let mut batch = Batch::with_capacity(1);
            batch.add(statement, params);
            self.execute_batch(batch).await?;
            return Ok(Box::pin(futures_util::stream::empty()));
        }

        let state = Arc::clone(&self.state);
        let statement = statement.statement().clone();
        let page_size = self.page_size;

        Ok(Box::pin(stream! {
            let mut after: Option<ClusteringKey> = None;
            let mut page_number = 0usize;
            loop {
                let page = match Self::read_page(
                    &state,
                    &statement,
                    &params,
                    after.as_ref(),
                    page_size,
                ) {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                debug!(
                    table = statement.table.name,
                    page = page_number,
                    rows = page.rows.len(),
                    "Fetched page"
                );
                page_number += 1;

                let exhausted = page.exhausted || page.last_key.is_none();
                after = page.last_key;
                for row in page.rows {
                    yield Ok(row);
                }
                if exhausted {
                    break;
                }
            }
        }))
    }

    #[instrument(skip(self, batch), fields(statements = batch.len()))]
    async fn execute_batch(&self, batch: Batch) -> StoreResult<()> {
        for entry in batch.entries() {
            let statement = entry.statement.statement();
            if statement.kind != StatementKind::Insert {
                return Err(StoreError::Validation(format!(
                    "{}: only inserts may be batched",
                    statement.table.name
                )));
            }
            statement.check_params(&entry.params)?;
        }

        let mut state = self.state.write();
        for entry in batch.entries() {
            let table = entry.statement.table();
            Self::check_table(&state, table)?;
            if state.failing_tables.contains(table.name) {
                return Err(StoreError::Storage(format!(
                    "write to {} rejected by substrate",
                    table.name
                )));
            }
        }

        for entry in batch.into_entries() {
            let name = entry.statement.table().name;
            if let Some(table) = state.tables.get_mut(name) {
                table.upsert(entry.params);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ACCOUNTS_BY_USER, TRADES_BY_ACCOUNT_TYPE_DATE};
    use futures_util::TryStreamExt;
    use rust_decimal_macros::dec;
    use trade_views_core::TradeId;

    async fn session_with(table: &'static ViewSchema, page_size: usize) -> MemorySession {
        let session = MemorySession::new("investments", page_size);
        session.create_keyspace(1).await.unwrap();
        session.create_table(table).await.unwrap();
        session
    }

    fn trade_params(account: &str, id: TradeId, kind: &str) -> Vec<Value> {
        vec![
            Value::from(account),
            Value::from(id),
            Value::from(kind),
            Value::from("SPY"),
            Value::from(dec!(1)),
            Value::from(dec!(2)),
            Value::from(dec!(2)),
        ]
    }

    #[tokio::test]
    async fn test_create_table_requires_keyspace() {
        let session = MemorySession::new("investments", 10);
        assert!(session.create_table(&ACCOUNTS_BY_USER).await.is_err());
    }

    #[tokio::test]
    async fn test_clustering_order_and_paging() {
        let session = session_with(&TRADES_BY_ACCOUNT_TYPE_DATE, 2).await;
        let insert = session
            .prepare(Statement::insert(&TRADES_BY_ACCOUNT_TYPE_DATE))
            .await
            .unwrap();

        let ids: Vec<TradeId> = (0..5)
            .map(|i| TradeId::at(chrono::DateTime::from_timestamp(1_600_000_000 + i, 0).unwrap()))
            .collect();
        let mut batch = Batch::new();
        for (i, id) in ids.iter().enumerate() {
            let kind = if i % 2 == 0 { "buy" } else { "sell" };
            batch.add(&insert, trade_params("A1", *id, kind));
        }
        session.execute_batch(batch).await.unwrap();

        let select = session
            .prepare(
                Statement::select(&TRADES_BY_ACCOUNT_TYPE_DATE, &["account", "type"], None)
                    .unwrap(),
            )
            .await
            .unwrap();
        let rows: Vec<Row> = session
            .execute(&select, vec![Value::from("A1"), Value::from("buy")])
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        // buys are ids 0, 2, 4; newest first
        let got: Vec<Value> = rows.iter().map(|r| r.get("trade_id").cloned().unwrap()).collect();
        assert_eq!(got, vec![Value::from(ids[4]), Value::from(ids[2]), Value::from(ids[0])]);
    }

    #[tokio::test]
    async fn test_static_column_shared_across_partition() {
        let session = session_with(&ACCOUNTS_BY_USER, 10).await;
        let insert = session.prepare(Statement::insert(&ACCOUNTS_BY_USER)).await.unwrap();

        for (account, name) in [("A1", "Mike"), ("A2", "Michael Jones")] {
            session
                .execute(
                    &insert,
                    vec![
                        Value::from("mike"),
                        Value::from(account),
                        Value::from(dec!(5)),
                        Value::from(name),
                    ],
                )
                .await
                .unwrap();
        }

        let select = session
            .prepare(Statement::select(&ACCOUNTS_BY_USER, &["username"], None).unwrap())
            .await
            .unwrap();
        let rows: Vec<Row> = session
            .execute(&select, vec![Value::from("mike")])
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.text("name").unwrap() == "Michael Jones"));
    }

    #[tokio::test]
    async fn test_failed_batch_writes_nothing() {
        let session = session_with(&TRADES_BY_ACCOUNT_TYPE_DATE, 10).await;
        let insert = session
            .prepare(Statement::insert(&TRADES_BY_ACCOUNT_TYPE_DATE))
            .await
            .unwrap();
        session.fail_writes_to(&TRADES_BY_ACCOUNT_TYPE_DATE);

        let mut batch = Batch::new();
        batch.add(&insert, trade_params("A1", TradeId::now(), "buy"));
        assert!(session.execute_batch(batch).await.is_err());
        assert_eq!(session.row_count(&TRADES_BY_ACCOUNT_TYPE_DATE), 0);
    }

    #[tokio::test]
    async fn test_missing_partition_is_empty() {
        let session = session_with(&ACCOUNTS_BY_USER, 10).await;
        let select = session
            .prepare(Statement::select(&ACCOUNTS_BY_USER, &["username"], None).unwrap())
            .await
            .unwrap();
        let rows: Vec<Row> = session
            .execute(&select, vec![Value::from("nobody")])
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
