//! # View Schema Registry
//!
//! Declarative key layout of every physical table. Each table lists its
//! partition key, its ordered clustering key with per-column direction, its
//! static columns and the full column set. The fan-out writer projects
//! records through [`ViewSchema::columns`]; the query router asks
//! [`ViewSchema::check_predicates`] which predicates a table can serve.
//!
//! The registry is fixed at compile time. Adding a trade view means adding a
//! [`ViewSchema`] constant and a [`TradeView`] variant; the writer's fan-out
//! list is [`TRADE_VIEWS`] and picks the new view up from there.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Column storage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Decimal,
    TimeUuid,
}

impl ColumnType {
    /// Type name in the wide-column dialect
    pub fn cql_name(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Decimal => "DECIMAL",
            ColumnType::TimeUuid => "TIMEUUID",
        }
    }
}

/// A named, typed column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
}

/// Sort direction of a clustering column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusteringOrder {
    Asc,
    Desc,
}

impl ClusteringOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            ClusteringOrder::Asc => "ASC",
            ClusteringOrder::Desc => "DESC",
        }
    }
}

/// A clustering column and its direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusteringColumn {
    pub name: &'static str,
    pub order: ClusteringOrder,
}

/// Key layout of one physical table
#[derive(Debug, PartialEq, Eq)]
pub struct ViewSchema {
    pub name: &'static str,
    pub partition_key: &'static [&'static str],
    pub clustering: &'static [ClusteringColumn],
    /// Columns holding one value per partition
    pub static_columns: &'static [&'static str],
    /// Every column, in insert order
    pub columns: &'static [Column],
}

impl ViewSchema {
    /// Column names in insert order
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_static(&self, name: &str) -> bool {
        self.static_columns.contains(&name)
    }

    /// Partition key followed by clustering columns
    pub fn primary_key(&self) -> Vec<&'static str> {
        self.partition_key
            .iter()
            .copied()
            .chain(self.clustering.iter().map(|c| c.name))
            .collect()
    }

    /// Checks that `equals` and `range` form a predicate this table serves
    /// with a single partition scan.
    ///
    /// `equals` must name the full partition key followed by a prefix of the
    /// clustering key, in declaration order. `range`, when present, must be
    /// the clustering column right after that prefix.
    pub fn check_predicates(&self, equals: &[&str], range: Option<&str>) -> StoreResult<()> {
        let partition_len = self.partition_key.len();
        if equals.len() < partition_len || equals[..partition_len] != *self.partition_key {
            return Err(StoreError::Validation(format!(
                "{}: predicates {:?} must start with partition key {:?}",
                self.name, equals, self.partition_key
            )));
        }

        let prefix = &equals[partition_len..];
        if prefix.len() > self.clustering.len() {
            return Err(StoreError::Validation(format!(
                "{}: too many equality predicates {:?}",
                self.name, equals
            )));
        }
        for (name, column) in prefix.iter().zip(self.clustering) {
            if *name != column.name {
                return Err(StoreError::Validation(format!(
                    "{}: equality on {} is not a clustering prefix (expected {})",
                    self.name, name, column.name
                )));
            }
        }

        if let Some(range) = range {
            match self.clustering.get(prefix.len()) {
                Some(next) if next.name == range => {}
                _ => {
                    return Err(StoreError::Validation(format!(
                        "{}: range on {} must follow the clustering prefix {:?}",
                        self.name, range, prefix
                    )))
                }
            }
        }

        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` statement in the wide-column dialect
    pub fn create_table_cql(&self, keyspace: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let suffix = if self.is_static(c.name) { " STATIC" } else { "" };
                format!("{} {}{}", c.name, c.kind.cql_name(), suffix)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let clustering = self
            .clustering
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>();
        let primary_key = if clustering.is_empty() {
            format!("(({}))", self.partition_key.join(", "))
        } else {
            format!("(({}), {})", self.partition_key.join(", "), clustering.join(", "))
        };

        let mut cql = format!(
            "CREATE TABLE IF NOT EXISTS {}.{} ({}, PRIMARY KEY {})",
            keyspace, self.name, columns, primary_key
        );

        if !self.clustering.is_empty() {
            let order = self
                .clustering
                .iter()
                .map(|c| format!("{} {}", c.name, c.order.keyword()))
                .collect::<Vec<_>>()
                .join(", ");
            cql.push_str(&format!(" WITH CLUSTERING ORDER BY ({})", order));
        }

        cql
    }
}

const fn asc(name: &'static str) -> ClusteringColumn {
    ClusteringColumn {
        name,
        order: ClusteringOrder::Asc,
    }
}

const fn desc(name: &'static str) -> ClusteringColumn {
    ClusteringColumn {
        name,
        order: ClusteringOrder::Desc,
    }
}

const fn text(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnType::Text,
    }
}

const fn decimal(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnType::Decimal,
    }
}

/// Columns shared by every trade view
const TRADE_COLUMNS: &[Column] = &[
    text("account"),
    Column {
        name: "trade_id",
        kind: ColumnType::TimeUuid,
    },
    text("type"),
    text("symbol"),
    decimal("shares"),
    decimal("price"),
    decimal("amount"),
];

pub static ACCOUNTS_BY_USER: ViewSchema = ViewSchema {
    name: "accounts_by_user",
    partition_key: &["username"],
    clustering: &[asc("account_number")],
    static_columns: &["name"],
    columns: &[
        text("username"),
        text("account_number"),
        decimal("cash_balance"),
        text("name"),
    ],
};

pub static POSITIONS_BY_ACCOUNT: ViewSchema = ViewSchema {
    name: "positions_by_account",
    partition_key: &["account"],
    clustering: &[asc("symbol")],
    static_columns: &[],
    columns: &[text("account"), text("symbol"), decimal("quantity")],
};

pub static TRADES_BY_ACCOUNT_DATE: ViewSchema = ViewSchema {
    name: "trades_by_account_date",
    partition_key: &["account"],
    clustering: &[desc("trade_id")],
    static_columns: &[],
    columns: TRADE_COLUMNS,
};

pub static TRADES_BY_ACCOUNT_TYPE_DATE: ViewSchema = ViewSchema {
    name: "trades_by_account_type_date",
    partition_key: &["account"],
    clustering: &[asc("type"), desc("trade_id")],
    static_columns: &[],
    columns: TRADE_COLUMNS,
};

pub static TRADES_BY_ACCOUNT_SYMBOL_TYPE_DATE: ViewSchema = ViewSchema {
    name: "trades_by_account_symbol_type_date",
    partition_key: &["account"],
    clustering: &[asc("symbol"), asc("type"), desc("trade_id")],
    static_columns: &[],
    columns: TRADE_COLUMNS,
};

pub static TRADES_BY_ACCOUNT_SYMBOL_DATE: ViewSchema = ViewSchema {
    name: "trades_by_account_symbol_date",
    partition_key: &["account"],
    clustering: &[asc("symbol"), desc("trade_id")],
    static_columns: &[],
    columns: TRADE_COLUMNS,
};

/// The denormalized trade views, one per query shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeView {
    ByAccountDate,
    ByAccountTypeDate,
    ByAccountSymbolTypeDate,
    ByAccountSymbolDate,
}

/// Trade fan-out list, in write order
pub const TRADE_VIEWS: [TradeView; 4] = [
    TradeView::ByAccountDate,
    TradeView::ByAccountTypeDate,
    TradeView::ByAccountSymbolTypeDate,
    TradeView::ByAccountSymbolDate,
];

impl TradeView {
    pub fn schema(&self) -> &'static ViewSchema {
        match self {
            TradeView::ByAccountDate => &TRADES_BY_ACCOUNT_DATE,
            TradeView::ByAccountTypeDate => &TRADES_BY_ACCOUNT_TYPE_DATE,
            TradeView::ByAccountSymbolTypeDate => &TRADES_BY_ACCOUNT_SYMBOL_TYPE_DATE,
            TradeView::ByAccountSymbolDate => &TRADES_BY_ACCOUNT_SYMBOL_DATE,
        }
    }

    pub fn name(&self) -> &'static str {
        self.schema().name
    }
}

/// Every table, in bootstrap order
pub fn all_tables() -> [&'static ViewSchema; 6] {
    [
        &ACCOUNTS_BY_USER,
        &POSITIONS_BY_ACCOUNT,
        TradeView::ByAccountDate.schema(),
        TradeView::ByAccountTypeDate.schema(),
        TradeView::ByAccountSymbolTypeDate.schema(),
        TradeView::ByAccountSymbolDate.schema(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_views_share_columns_and_partition() {
        for view in TRADE_VIEWS {
            let schema = view.schema();
            assert_eq!(schema.partition_key, &["account"]);
            assert_eq!(schema.columns, TRADE_COLUMNS);
            let last = schema.clustering.last().unwrap();
            assert_eq!(last.name, "trade_id");
            assert_eq!(last.order, ClusteringOrder::Desc);
        }
    }

    #[test]
    fn test_table_names_are_unique() {
        let mut names: Vec<_> = all_tables().iter().map(|t| t.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn test_predicate_checks() {
        let schema = &TRADES_BY_ACCOUNT_SYMBOL_TYPE_DATE;
        assert!(schema.check_predicates(&["account"], Some("symbol")).is_ok());
        assert!(schema
            .check_predicates(&["account", "symbol", "type"], Some("trade_id"))
            .is_ok());
        // type without symbol skips a clustering column
        assert!(schema.check_predicates(&["account", "type"], None).is_err());
        assert!(schema.check_predicates(&["symbol"], None).is_err());
        assert!(schema
            .check_predicates(&["account", "symbol"], Some("trade_id"))
            .is_err());
    }

    #[test]
    fn test_create_table_cql() {
        let cql = TRADES_BY_ACCOUNT_TYPE_DATE.create_table_cql("investments");
        assert!(
            cql.starts_with("CREATE TABLE IF NOT EXISTS investments.trades_by_account_type_date")
        );
        assert!(cql.contains("trade_id TIMEUUID"));
        assert!(cql.contains("PRIMARY KEY ((account), type, trade_id)"));
        assert!(cql.ends_with("WITH CLUSTERING ORDER BY (type ASC, trade_id DESC)"));

        let accounts = ACCOUNTS_BY_USER.create_table_cql("investments");
        assert!(accounts.contains("name TEXT STATIC"));
    }
}
