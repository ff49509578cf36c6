//! # Storage Session
//!
//! The substrate contract: keyspace and table bootstrap, statement
//! preparation, single-statement execution returning a lazy row stream, and
//! batch execution. Statements are derived from the view registry rather
//! than written by hand, so every substrate sees the same key layout.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;
use trade_views_core::{TradeId, TradeType};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::schema::{ColumnType, ViewSchema};

/// A single column value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Text(String),
    Decimal(Decimal),
    Uuid(Uuid),
}

impl Value {
    /// Whether the value can be stored in a column of `kind`
    pub fn fits(&self, kind: ColumnType) -> bool {
        matches!(
            (self, kind),
            (Value::Text(_), ColumnType::Text)
                | (Value::Decimal(_), ColumnType::Decimal)
                | (Value::Uuid(_), ColumnType::TimeUuid)
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Uuid(u) => write!(f, "{}", u),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<TradeId> for Value {
    fn from(value: TradeId) -> Self {
        Value::Uuid(value.as_uuid())
    }
}

impl From<TradeType> for Value {
    fn from(value: TradeType) -> Self {
        Value::Text(value.as_str().to_string())
    }
}

/// A row returned by the substrate, keyed by column name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.columns.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn text(&self, column: &str) -> StoreResult<&str> {
        match self.get(column) {
            Some(Value::Text(s)) => Ok(s),
            other => Err(decode_error(column, "text", other)),
        }
    }

    pub fn decimal(&self, column: &str) -> StoreResult<Decimal> {
        match self.get(column) {
            Some(Value::Decimal(d)) => Ok(*d),
            other => Err(decode_error(column, "decimal", other)),
        }
    }

    pub fn uuid(&self, column: &str) -> StoreResult<Uuid> {
        match self.get(column) {
            Some(Value::Uuid(u)) => Ok(*u),
            other => Err(decode_error(column, "uuid", other)),
        }
    }
}

fn decode_error(column: &str, expected: &str, found: Option<&Value>) -> StoreError {
    match found {
        Some(value) => StoreError::Decode(format!(
            "column {} holds {}, expected {}",
            column, value, expected
        )),
        None => StoreError::Decode(format!("column {} missing from row", column)),
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Lazy, forward-only sequence of rows
pub type RowStream = BoxStream<'static, StoreResult<Row>>;

/// What a statement does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// Upsert one row; parameters follow the table's column order
    Insert,
    /// Single-partition scan; parameters are the `equals` values in order,
    /// then the inclusive lower and upper bound of `range` if present
    Select {
        equals: Vec<&'static str>,
        range: Option<&'static str>,
    },
}

/// A parameterized statement against one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub table: &'static ViewSchema,
    pub kind: StatementKind,
}

impl Statement {
    pub fn insert(table: &'static ViewSchema) -> Self {
        Self {
            table,
            kind: StatementKind::Insert,
        }
    }

    /// Builds a scan, rejecting predicates the table's key layout cannot serve
    pub fn select(
        table: &'static ViewSchema,
        equals: &[&'static str],
        range: Option<&'static str>,
    ) -> StoreResult<Self> {
        table.check_predicates(equals, range)?;
        Ok(Self {
            table,
            kind: StatementKind::Select {
                equals: equals.to_vec(),
                range,
            },
        })
    }

    /// Number of bind parameters the statement expects
    pub fn param_count(&self) -> usize {
        match &self.kind {
            StatementKind::Insert => self.table.columns.len(),
            StatementKind::Select { equals, range } => {
                equals.len() + if range.is_some() { 2 } else { 0 }
            }
        }
    }

    /// Checks arity and column types of `params`
    pub fn check_params(&self, params: &[Value]) -> StoreResult<()> {
        if params.len() != self.param_count() {
            return Err(StoreError::Validation(format!(
                "{}: expected {} parameters, got {}",
                self.table.name,
                self.param_count(),
                params.len()
            )));
        }

        let columns: Vec<&str> = match &self.kind {
            StatementKind::Insert => self.table.column_names(),
            StatementKind::Select { equals, range } => {
                let mut columns = equals.clone();
                if let Some(range) = range {
                    columns.push(*range);
                    columns.push(*range);
                }
                columns
            }
        };

        for (name, value) in columns.iter().zip(params) {
            let column = self.table.column(name).ok_or_else(|| {
                StoreError::Validation(format!("{}: unknown column {}", self.table.name, name))
            })?;
            if !value.fits(column.kind) {
                return Err(StoreError::Validation(format!(
                    "{}: value {} does not fit column {} ({:?})",
                    self.table.name, value, name, column.kind
                )));
            }
        }

        Ok(())
    }

    /// Statement text in the wide-column dialect with `?` placeholders
    pub fn cql(&self, keyspace: &str) -> String {
        let table = format!("{}.{}", keyspace, self.table.name);
        let columns = self.table.column_names();
        match &self.kind {
            StatementKind::Insert => format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            ),
            StatementKind::Select { equals, range } => {
                let mut predicates: Vec<String> =
                    equals.iter().map(|c| format!("{} = ?", c)).collect();
                if let Some(range) = range {
                    predicates.push(format!("{} >= ?", range));
                    predicates.push(format!("{} <= ?", range));
                }
                format!(
                    "SELECT {} FROM {} WHERE {}",
                    columns.join(", "),
                    table,
                    predicates.join(" AND ")
                )
            }
        }
    }
}

/// A statement compiled by a session
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    statement: Arc<Statement>,
    text: Arc<str>,
}

impl PreparedStatement {
    pub fn new(statement: Statement, text: impl Into<Arc<str>>) -> Self {
        Self {
            statement: Arc::new(statement),
            text: text.into(),
        }
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn table(&self) -> &'static ViewSchema {
        self.statement.table
    }

    /// Text the substrate compiled
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// One bound statement in a batch
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub statement: PreparedStatement,
    pub params: Vec<Value>,
}

/// A group of statements submitted in one round-trip.
///
/// A batch spanning several partitions is not a cross-partition
/// transaction on a wide-column store.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    entries: Vec<BatchEntry>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, statement: &PreparedStatement, params: Vec<Value>) {
        self.entries.push(BatchEntry {
            statement: statement.clone(),
            params,
        });
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<BatchEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Connection to a partitioned, sorted-key storage substrate
#[async_trait]
pub trait Session: Send + Sync {
    /// Keyspace the session reads and writes
    fn keyspace(&self) -> &str;

    /// Creates the session keyspace if absent
    async fn create_keyspace(&self, replication_factor: u32) -> StoreResult<()>;

    /// Creates a table if absent
    async fn create_table(&self, table: &'static ViewSchema) -> StoreResult<()>;

    /// Compiles a statement for repeated execution
    async fn prepare(&self, statement: Statement) -> StoreResult<PreparedStatement>;

    /// Executes one statement; inserts yield an empty stream
    async fn execute(&self, statement: &PreparedStatement, params: Vec<Value>)
        -> StoreResult<RowStream>;

    /// Executes every statement of the batch in one submission
    async fn execute_batch(&self, batch: Batch) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ACCOUNTS_BY_USER, TRADES_BY_ACCOUNT_SYMBOL_TYPE_DATE};
    use rust_decimal_macros::dec;

    #[test]
    fn test_insert_cql() {
        let statement = Statement::insert(&ACCOUNTS_BY_USER);
        assert_eq!(
            statement.cql("investments"),
            "INSERT INTO investments.accounts_by_user (username, account_number, cash_balance, name) VALUES (?, ?, ?, ?)"
        );
        assert_eq!(statement.param_count(), 4);
    }

    #[test]
    fn test_select_cql_with_range() {
        let statement = Statement::select(
            &TRADES_BY_ACCOUNT_SYMBOL_TYPE_DATE,
            &["account", "symbol", "type"],
            Some("trade_id"),
        )
        .unwrap();

        let cql = statement.cql("investments");
        assert!(cql.ends_with(
            "WHERE account = ? AND symbol = ? AND type = ? AND trade_id >= ? AND trade_id <= ?"
        ));
        assert_eq!(statement.param_count(), 5);
    }

    #[test]
    fn test_param_checks() {
        let statement = Statement::insert(&ACCOUNTS_BY_USER);
        let good = vec![
            Value::from("mike"),
            Value::from("A1"),
            Value::from(dec!(10.5)),
            Value::from("Michael Jones"),
        ];
        assert!(statement.check_params(&good).is_ok());
        assert!(statement.check_params(&good[..3]).is_err());

        let mut bad = good.clone();
        bad[2] = Value::from("ten");
        assert!(statement.check_params(&bad).is_err());
    }

    #[test]
    fn test_row_accessors() {
        let mut row = Row::new();
        row.insert("symbol", Value::from("SPY"));
        row.insert("shares", Value::from(dec!(10)));

        assert_eq!(row.text("symbol").unwrap(), "SPY");
        assert_eq!(row.decimal("shares").unwrap(), dec!(10));
        assert!(matches!(row.uuid("symbol"), Err(StoreError::Decode(_))));
        assert!(matches!(row.text("price"), Err(StoreError::Decode(_))));
    }
}
