//! # PostgreSQL Substrate
//!
//! Maps the view registry onto PostgreSQL: a keyspace becomes a schema, each
//! view a table whose primary key is the partition key followed by the
//! clustering key. Clustering order is applied with `ORDER BY` on every scan.
//! Inserts are upserts on the primary key, and static columns are propagated
//! to every row of the partition in the same transaction.
//!
//! Each batch runs in one transaction, which makes a single batch atomic on
//! this substrate. Consistency across batches and across views is still
//! best-effort.

use async_stream::stream;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row as _};
use tracing::{debug, info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::schema::{ColumnType, ViewSchema};
use crate::session::{
    Batch, PreparedStatement, Row, RowStream, Session, Statement, StatementKind, Value,
};

/// PostgreSQL implementation of [`Session`]
pub struct PgSession {
    pool: PgPool,
    keyspace: String,
}

impl PgSession {
    /// Connects a pool and binds the session to `keyspace`
    #[instrument(skip(config), fields(database_url = %config.database_url))]
    pub async fn connect(config: &DatabaseConfig, keyspace: &str) -> StoreResult<Self> {
        if !is_identifier(keyspace) {
            return Err(StoreError::Configuration(format!(
                "invalid keyspace name: {}",
                keyspace
            )));
        }

        info!("Initializing database connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .connect(&config.database_url)
            .await?;

        let version: String = sqlx::query_scalar("SELECT version()")
            .fetch_one(&pool)
            .await?;

        info!("Connected to PostgreSQL: {}", version);

        Ok(Self::with_pool(pool, keyspace))
    }

    /// Wraps an existing pool
    pub fn with_pool(pool: PgPool, keyspace: &str) -> Self {
        Self {
            pool,
            keyspace: keyspace.to_string(),
        }
    }

    /// Check database health
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> StoreResult<()> {
        let result: (i32,) = sqlx::query_as("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;

        if result.0 == 1 {
            debug!("Database health check passed");
            Ok(())
        } else {
            Err(StoreError::Storage(
                "Health check returned unexpected result".to_string(),
            ))
        }
    }

    fn qualified(&self, table: &ViewSchema) -> String {
        format!("{}.{}", self.keyspace, table.name)
    }

    fn create_table_sql(&self, table: &ViewSchema) -> String {
        let columns = table
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, sql_type(c.kind)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            self.qualified(table),
            columns,
            table.primary_key().join(", ")
        )
    }

    fn render(&self, statement: &Statement) -> String {
        let table = statement.table;
        let columns = table.column_names();
        match &statement.kind {
            StatementKind::Insert => {
                let primary_key = table.primary_key();
                let placeholders = (1..=columns.len())
                    .map(|i| format!("${}", i))
                    .collect::<Vec<_>>()
                    .join(", ");
                let updates = columns
                    .iter()
                    .filter(|c| !primary_key.contains(*c))
                    .map(|c| format!("{} = EXCLUDED.{}", c, c))
                    .collect::<Vec<_>>();
                let conflict = if updates.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {}", updates.join(", "))
                };
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
                    self.qualified(table),
                    columns.join(", "),
                    placeholders,
                    primary_key.join(", "),
                    conflict
                )
            }
            StatementKind::Select { equals, range } => {
                let mut predicates: Vec<String> = equals
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("{} = ${}", c, i + 1))
                    .collect();
                if let Some(range) = range {
                    let next = equals.len() + 1;
                    predicates.push(format!("{} >= ${}", range, next));
                    predicates.push(format!("{} <= ${}", range, next + 1));
                }
                let order = table
                    .clustering
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.order.keyword()))
                    .collect::<Vec<_>>();
                let mut sql = format!(
                    "SELECT {} FROM {} WHERE {}",
                    columns.join(", "),
                    self.qualified(table),
                    predicates.join(" AND ")
                );
                if !order.is_empty() {
                    sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
                }
                sql
            }
        }
    }

    /// `UPDATE` spreading static column values over the whole partition
    fn static_update(&self, table: &ViewSchema, params: &[Value]) -> Option<(String, Vec<Value>)> {
        if table.static_columns.is_empty() {
            return None;
        }

        let value_of = |name: &str| {
            table
                .columns
                .iter()
                .position(|c| c.name == name)
                .and_then(|i| params.get(i).cloned())
        };

        let mut values = Vec::new();
        let mut assignments = Vec::new();
        for name in table.static_columns {
            values.push(value_of(*name)?);
            assignments.push(format!("{} = ${}", name, values.len()));
        }
        let mut predicates = Vec::new();
        for name in table.partition_key {
            values.push(value_of(*name)?);
            predicates.push(format!("{} = ${}", name, values.len()));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.qualified(table),
            assignments.join(", "),
            predicates.join(" AND ")
        );
        Some((sql, values))
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn sql_type(kind: ColumnType) -> &'static str {
    match kind {
        ColumnType::Text => "TEXT",
        ColumnType::Decimal => "NUMERIC",
        ColumnType::TimeUuid => "UUID",
    }
}

fn bind_values(
    mut query: Query<'_, Postgres, PgArguments>,
    params: Vec<Value>,
) -> Query<'_, Postgres, PgArguments> {
    for value in params {
        query = match value {
            Value::Text(s) => query.bind(s),
            Value::Decimal(d) => query.bind(d),
            Value::Uuid(u) => query.bind(u),
        };
    }
    query
}

fn decode_row(row: &PgRow, table: &ViewSchema) -> StoreResult<Row> {
    let mut decoded = Row::new();
    for column in table.columns {
        let value = match column.kind {
            ColumnType::Text => Value::Text(row.try_get(column.name)?),
            ColumnType::Decimal => Value::Decimal(row.try_get(column.name)?),
            ColumnType::TimeUuid => Value::Uuid(row.try_get(column.name)?),
        };
        decoded.insert(column.name, value);
    }
    Ok(decoded)
}

#[async_trait]
impl Session for PgSession {
    fn keyspace(&self) -> &str {
        &self.keyspace
    }

    #[instrument(skip(self), fields(keyspace = %self.keyspace))]
    async fn create_keyspace(&self, replication_factor: u32) -> StoreResult<()> {
        if replication_factor > 1 {
            warn!(
                "Replication factor {} is managed by the PostgreSQL deployment, not the schema",
                replication_factor
            );
        }
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.keyspace))
            .execute(&self.pool)
            .await?;
        info!("Keyspace ready");
        Ok(())
    }

    #[instrument(skip(self, table), fields(table = table.name))]
    async fn create_table(&self, table: &'static ViewSchema) -> StoreResult<()> {
        let sql = self.create_table_sql(table);
        debug!("Executing: {}", sql);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self, statement), fields(table = statement.table.name))]
    async fn prepare(&self, statement: Statement) -> StoreResult<PreparedStatement> {
        let sql = self.render(&statement);
        debug!("Prepared: {}", sql);
        Ok(PreparedStatement::new(statement, sql))
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

        let pool = self.pool.clone();
        let sql = statement.text().to_string();
        let table = statement.table();

        Ok(Box::pin(stream! {
            let query = bind_values(sqlx::query(&sql), params);
            let mut rows = query.fetch(&pool);
            loop {
                match rows.try_next().await {
                    Ok(Some(row)) => yield decode_row(&row, table),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(StoreError::from(e));
                        break;
                    }
                }
            }
        }))
    }

    #[instrument(skip(self, batch), fields(statements = batch.len()))]
    async fn execute_batch(&self, batch: Batch) -> StoreResult<()> {
        for entry in batch.entries() {
            if entry.statement.statement().kind != StatementKind::Insert {
                return Err(StoreError::Validation(format!(
                    "{}: only inserts may be batched",
                    entry.statement.table().name
                )));
            }
            entry.statement.statement().check_params(&entry.params)?;
        }

        let mut tx = self.pool.begin().await?;

        for entry in batch.into_entries() {
            let table = entry.statement.table();
            let follow_up = self.static_update(table, &entry.params);

            bind_values(sqlx::query(entry.statement.text()), entry.params)
                .execute(&mut *tx)
                .await?;

            if let Some((sql, values)) = follow_up {
                bind_values(sqlx::query(&sql), values)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ACCOUNTS_BY_USER, POSITIONS_BY_ACCOUNT, TRADES_BY_ACCOUNT_SYMBOL_DATE};

    fn session() -> PgSession {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/investments")
            .unwrap();
        PgSession::with_pool(pool, "investments")
    }

    #[tokio::test]
    async fn test_render_select_orders_by_clustering_key() {
        let statement = Statement::select(
            &TRADES_BY_ACCOUNT_SYMBOL_DATE,
            &["account", "symbol"],
            Some("trade_id"),
        )
        .unwrap();

        let sql = session().render(&statement);
        assert!(sql.contains("FROM investments.trades_by_account_symbol_date"));
        assert!(sql.contains(
            "WHERE account = $1 AND symbol = $2 AND trade_id >= $3 AND trade_id <= $4"
        ));
        assert!(sql.ends_with("ORDER BY symbol ASC, trade_id DESC"));
    }

    #[tokio::test]
    async fn test_render_insert_is_upsert() {
        let sql = session().render(&Statement::insert(&POSITIONS_BY_ACCOUNT));
        assert_eq!(
            sql,
            "INSERT INTO investments.positions_by_account (account, symbol, quantity) VALUES ($1, $2, $3) \
             ON CONFLICT (account, symbol) DO UPDATE SET quantity = EXCLUDED.quantity"
        );
    }

    #[tokio::test]
    async fn test_static_update_targets_partition() {
        let params = vec![
            Value::from("mike"),
            Value::from("A1"),
            Value::from(rust_decimal::Decimal::ONE),
            Value::from("Michael Jones"),
        ];
        let (sql, values) = session().static_update(&ACCOUNTS_BY_USER, &params).unwrap();
        assert_eq!(
            sql,
            "UPDATE investments.accounts_by_user SET name = $1 WHERE username = $2"
        );
        assert_eq!(values, vec![Value::from("Michael Jones"), Value::from("mike")]);
    }

    #[tokio::test]
    async fn test_create_table_sql() {
        let sql = session().create_table_sql(&ACCOUNTS_BY_USER);
        assert!(sql.contains("cash_balance NUMERIC"));
        assert!(sql.ends_with("PRIMARY KEY (username, account_number))"));
    }
}
