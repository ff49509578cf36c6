//! # Query Router
//!
//! Maps a trade query onto the single view whose partition and clustering
//! prefix serve it, and turns date windows into inclusive [`TradeId`] bounds
//! on the `trade_id` clustering column.
//!
//! The equality columns of every scan come from the registry: the view's
//! partition key plus every clustering column ahead of `trade_id`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use trade_views_core::{Account, Position, Symbol, Trade, TradeId, TradeType};

use crate::config::QueryConfig;
use crate::error::{StoreError, StoreResult};
use crate::records::ViewRecord;
use crate::schema::{
    TradeView, ViewSchema, ACCOUNTS_BY_USER, POSITIONS_BY_ACCOUNT, TRADE_VIEWS,
};
use crate::session::{PreparedStatement, Session, Statement, Value};

/// Days covered by [`DateWindow::default`]
pub const DEFAULT_TRADE_WINDOW_DAYS: u32 = 30;

/// Longest configurable default window, one hundred years
pub const MAX_TRADE_WINDOW_DAYS: u32 = 36_500;

const TRADE_ID: &str = "trade_id";

/// Lazy stream of trades, most recent first
pub type TradeStream = BoxStream<'static, StoreResult<Trade>>;

/// The four supported trade lookups, without their filter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryShape {
    ByDate,
    ByType,
    BySymbolAndType,
    BySymbol,
}

impl QueryShape {
    pub const ALL: [QueryShape; 4] = [
        QueryShape::ByDate,
        QueryShape::ByType,
        QueryShape::BySymbolAndType,
        QueryShape::BySymbol,
    ];

    /// Resolves the numbered lookup menu (1 to 4)
    pub fn from_code(code: u8) -> StoreResult<Self> {
        match code {
            1 => Ok(QueryShape::ByDate),
            2 => Ok(QueryShape::ByType),
            3 => Ok(QueryShape::BySymbolAndType),
            4 => Ok(QueryShape::BySymbol),
            other => Err(StoreError::InvalidQueryShape(format!(
                "unknown query code {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryShape::ByDate => "by-date",
            QueryShape::ByType => "by-type",
            QueryShape::BySymbolAndType => "by-symbol-and-type",
            QueryShape::BySymbol => "by-symbol",
        }
    }

    /// View serving this shape
    pub fn view(&self) -> TradeView {
        match self {
            QueryShape::ByDate => TradeView::ByAccountDate,
            QueryShape::ByType => TradeView::ByAccountTypeDate,
            QueryShape::BySymbolAndType => TradeView::ByAccountSymbolTypeDate,
            QueryShape::BySymbol => TradeView::ByAccountSymbolDate,
        }
    }

    fn needs_symbol(&self) -> bool {
        matches!(self, QueryShape::BySymbolAndType | QueryShape::BySymbol)
    }

    fn needs_type(&self) -> bool {
        matches!(self, QueryShape::ByType | QueryShape::BySymbolAndType)
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueryShape {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "by-date" | "date" => Ok(QueryShape::ByDate),
            "by-type" | "type" => Ok(QueryShape::ByType),
            "by-symbol-and-type" | "symbol-and-type" | "symbol-type" => {
                Ok(QueryShape::BySymbolAndType)
            }
            "by-symbol" | "symbol" => Ok(QueryShape::BySymbol),
            _ => match normalized.parse::<u8>() {
                Ok(code) => QueryShape::from_code(code),
                Err(_) => Err(StoreError::InvalidQueryShape(format!(
                    "unknown query shape '{}'",
                    s
                ))),
            },
        }
    }
}

/// A trade lookup together with its filter values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeQuery {
    ByDate,
    ByType(TradeType),
    BySymbolAndType {
        symbol: Symbol,
        trade_type: TradeType,
    },
    BySymbol(Symbol),
}

impl TradeQuery {
    /// Builds a query from a shape and loose filters.
    ///
    /// Each shape takes exactly the filters it names; a missing, empty or
    /// extraneous filter is an [`StoreError::InvalidQueryShape`].
    pub fn from_parts(
        shape: QueryShape,
        symbol: Option<&str>,
        trade_type: Option<TradeType>,
    ) -> StoreResult<Self> {
        let symbol = match symbol.map(str::trim) {
            Some("") => {
                return Err(StoreError::InvalidQueryShape(format!(
                    "{} given an empty symbol",
                    shape
                )))
            }
            other => other,
        };

        match (shape.needs_symbol(), symbol.is_some()) {
            (true, false) => {
                return Err(StoreError::InvalidQueryShape(format!(
                    "{} requires a symbol",
                    shape
                )))
            }
            (false, true) => {
                return Err(StoreError::InvalidQueryShape(format!(
                    "{} does not take a symbol",
                    shape
                )))
            }
            _ => {}
        }
        match (shape.needs_type(), trade_type.is_some()) {
            (true, false) => {
                return Err(StoreError::InvalidQueryShape(format!(
                    "{} requires a trade type",
                    shape
                )))
            }
            (false, true) => {
                return Err(StoreError::InvalidQueryShape(format!(
                    "{} does not take a trade type",
                    shape
                )))
            }
            _ => {}
        }

        Ok(match (shape, symbol, trade_type) {
            (QueryShape::ByType, _, Some(trade_type)) => TradeQuery::ByType(trade_type),
            (QueryShape::BySymbolAndType, Some(symbol), Some(trade_type)) => {
                TradeQuery::BySymbolAndType {
                    symbol: symbol.to_string(),
                    trade_type,
                }
            }
            (QueryShape::BySymbol, Some(symbol), _) => TradeQuery::BySymbol(symbol.to_string()),
            _ => TradeQuery::ByDate,
        })
    }

    pub fn shape(&self) -> QueryShape {
        match self {
            TradeQuery::ByDate => QueryShape::ByDate,
            TradeQuery::ByType(_) => QueryShape::ByType,
            TradeQuery::BySymbolAndType { .. } => QueryShape::BySymbolAndType,
            TradeQuery::BySymbol(_) => QueryShape::BySymbol,
        }
    }

    pub fn view(&self) -> TradeView {
        self.shape().view()
    }

    /// Equality value this query supplies for `column`, other than the account
    fn filter_value(&self, column: &str) -> Option<Value> {
        match (self, column) {
            (TradeQuery::ByType(trade_type), "type")
            | (TradeQuery::BySymbolAndType { trade_type, .. }, "type") => {
                Some((*trade_type).into())
            }
            (TradeQuery::BySymbolAndType { symbol, .. }, "symbol")
            | (TradeQuery::BySymbol(symbol), "symbol") => Some(symbol.clone().into()),
            _ => None,
        }
    }
}

/// Half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Self> {
        if end <= start {
            return Err(StoreError::Validation(format!(
                "date range end {} is not after start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// The whole UTC day `day`; the last representable day has no end
    pub fn day(day: NaiveDate) -> StoreResult<Self> {
        let start = Utc.from_utc_datetime(&day.and_time(NaiveTime::default()));
        let end = start
            .checked_add_signed(Duration::days(1))
            .ok_or_else(|| StoreError::Validation(format!("day {} is out of range", day)))?;
        Ok(Self { start, end })
    }

    /// From the start of `first` through the end of `last`, both inclusive
    pub fn days(first: NaiveDate, last: NaiveDate) -> StoreResult<Self> {
        let start = Self::day(first)?.start;
        let end = Self::day(last)?.end;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Inclusive `trade_id` bounds covering the range
    pub fn bounds(&self) -> (TradeId, TradeId) {
        TradeId::range_bounds(self.start, self.end).unwrap_or_else(|| {
            // Unreachable for a constructed range; fall back to the start millisecond
            (
                TradeId::lower_bound(self.start),
                TradeId::upper_bound(self.start),
            )
        })
    }
}

/// Time restriction applied to a trade lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWindow {
    /// The last `days` days up to the time of the query
    Latest { days: u32 },
    Between(DateRange),
    /// Every trade in the partition
    Unbounded,
}

impl Default for DateWindow {
    fn default() -> Self {
        DateWindow::Latest {
            days: DEFAULT_TRADE_WINDOW_DAYS,
        }
    }
}

impl DateWindow {
    /// Concrete range of the window at `now`, or `None` when unbounded.
    ///
    /// A `Latest` window reaching past the representable past starts at the
    /// earliest representable instant.
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<DateRange> {
        match self {
            DateWindow::Latest { days } => {
                // Includes trades stamped in the current millisecond
                let end = now
                    .checked_add_signed(Duration::milliseconds(1))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let start = now
                    .checked_sub_signed(Duration::days(i64::from(*days)))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                Some(DateRange { start, end })
            }
            DateWindow::Between(range) => Some(*range),
            DateWindow::Unbounded => None,
        }
    }
}

impl From<DateRange> for DateWindow {
    fn from(range: DateRange) -> Self {
        DateWindow::Between(range)
    }
}

/// Prepared scans for one trade view
struct TradeScans {
    equals: Vec<&'static str>,
    unbounded: PreparedStatement,
    ranged: PreparedStatement,
}

/// Serves account, position and trade lookups
pub struct QueryRouter {
    session: Arc<dyn Session>,
    config: QueryConfig,
    accounts: PreparedStatement,
    positions: PreparedStatement,
    trades: HashMap<TradeView, TradeScans>,
}

impl QueryRouter {
    /// Prepares every lookup statement up front
    #[instrument(skip(session, config))]
    pub async fn new(session: Arc<dyn Session>, config: QueryConfig) -> StoreResult<Self> {
        let accounts = session
            .prepare(Statement::select(
                &ACCOUNTS_BY_USER,
                ACCOUNTS_BY_USER.partition_key,
                None,
            )?)
            .await?;
        let positions = session
            .prepare(Statement::select(
                &POSITIONS_BY_ACCOUNT,
                POSITIONS_BY_ACCOUNT.partition_key,
                None,
            )?)
            .await?;

        let mut trades = HashMap::with_capacity(TRADE_VIEWS.len());
        for view in TRADE_VIEWS {
            let schema = view.schema();
            let equals = equality_columns(schema);
            let unbounded = session
                .prepare(Statement::select(schema, &equals, None)?)
                .await?;
            let ranged = session
                .prepare(Statement::select(schema, &equals, Some(TRADE_ID))?)
                .await?;
            trades.insert(
                view,
                TradeScans {
                    equals,
                    unbounded,
                    ranged,
                },
            );
        }

        debug!("Prepared lookups for {} trade views", trades.len());

        Ok(Self {
            session,
            config,
            accounts,
            positions,
            trades,
        })
    }

    /// Window used when a caller does not choose one
    pub fn default_window(&self) -> DateWindow {
        DateWindow::Latest {
            days: self.config.default_window_days,
        }
    }

    /// Accounts of `username`, ordered by account number
    #[instrument(skip(self))]
    pub async fn list_accounts(&self, username: &str) -> StoreResult<Vec<Account>> {
        require("username", username)?;
        let rows = self
            .session
            .execute(&self.accounts, vec![username.into()])
            .await?;
        let accounts: Vec<Account> = rows
            .and_then(|row| async move { Account::from_row(&row) })
            .try_collect()
            .await?;
        debug!("Found {} accounts", accounts.len());
        Ok(accounts)
    }

    /// Positions of `account`, ordered by symbol
    #[instrument(skip(self))]
    pub async fn list_positions(&self, account: &str) -> StoreResult<Vec<Position>> {
        require("account", account)?;
        let rows = self
            .session
            .execute(&self.positions, vec![account.into()])
            .await?;
        let positions: Vec<Position> = rows
            .and_then(|row| async move { Position::from_row(&row) })
            .try_collect()
            .await?;
        debug!("Found {} positions", positions.len());
        Ok(positions)
    }

    /// Trades of `account` matching `query` within `window`, most recent first
    #[instrument(skip(self), fields(view = query.view().name()))]
    pub async fn find_trades(
        &self,
        account: &str,
        query: &TradeQuery,
        window: DateWindow,
    ) -> StoreResult<TradeStream> {
        require("account", account)?;

        let view = query.view();
        let scans = self.trades.get(&view).ok_or_else(|| {
            StoreError::Configuration(format!("no lookup prepared for {}", view.name()))
        })?;

        let mut params = Vec::with_capacity(scans.equals.len() + 2);
        for column in &scans.equals {
            let value = if *column == "account" {
                Some(Value::from(account))
            } else {
                query.filter_value(column)
            };
            params.push(value.ok_or_else(|| {
                StoreError::InvalidQueryShape(format!(
                    "{} has no value for {}",
                    query.shape(),
                    column
                ))
            })?);
        }

        let statement = match window.resolve(Utc::now()) {
            Some(range) => {
                let (lower, upper) = range.bounds();
                debug!(start = %range.start(), end = %range.end(), "Bounded trade scan");
                params.push(lower.into());
                params.push(upper.into());
                &scans.ranged
            }
            None => &scans.unbounded,
        };

        let rows = self.session.execute(statement, params).await?;
        Ok(rows
            .map(|row| row.and_then(|row| Trade::from_row(&row)))
            .boxed())
    }

    /// Validates loose filters against `shape`, then runs [`Self::find_trades`]
    pub async fn find_trades_by_shape(
        &self,
        account: &str,
        shape: QueryShape,
        symbol: Option<&str>,
        trade_type: Option<TradeType>,
        window: DateWindow,
    ) -> StoreResult<TradeStream> {
        let query = TradeQuery::from_parts(shape, symbol, trade_type)?;
        self.find_trades(account, &query, window).await
    }
}

/// Partition key plus the clustering prefix ahead of `trade_id`
fn equality_columns(schema: &'static ViewSchema) -> Vec<&'static str> {
    schema
        .partition_key
        .iter()
        .copied()
        .chain(
            schema
                .clustering
                .iter()
                .map(|c| c.name)
                .take_while(|name| *name != TRADE_ID),
        )
        .collect()
}

fn require(field: &str, value: &str) -> StoreResult<()> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_accepts_matching_filters() {
        assert_eq!(
            TradeQuery::from_parts(QueryShape::ByDate, None, None).unwrap(),
            TradeQuery::ByDate
        );
        assert_eq!(
            TradeQuery::from_parts(QueryShape::BySymbolAndType, Some("SPY"), Some(TradeType::Buy))
                .unwrap(),
            TradeQuery::BySymbolAndType {
                symbol: "SPY".to_string(),
                trade_type: TradeType::Buy
            }
        );
        assert_eq!(
            TradeQuery::from_parts(QueryShape::BySymbol, Some(" ETSY "), None).unwrap(),
            TradeQuery::BySymbol("ETSY".to_string())
        );
    }

    #[test]
    fn test_from_parts_rejects_mismatched_filters() {
        let cases = [
            (QueryShape::ByDate, Some("SPY"), None),
            (QueryShape::ByDate, None, Some(TradeType::Sell)),
            (QueryShape::ByType, None, None),
            (QueryShape::BySymbolAndType, Some("SPY"), None),
            (QueryShape::BySymbol, None, None),
            (QueryShape::BySymbol, Some(""), None),
        ];
        for (shape, symbol, trade_type) in cases {
            let err = TradeQuery::from_parts(shape, symbol, trade_type).unwrap_err();
            assert!(matches!(err, StoreError::InvalidQueryShape(_)), "{shape}");
            assert!(err.is_validation());
        }
    }

    #[test]
    fn test_shape_codes_and_names() {
        assert_eq!(QueryShape::from_code(3).unwrap(), QueryShape::BySymbolAndType);
        assert!(QueryShape::from_code(0).is_err());
        assert!(QueryShape::from_code(5).is_err());
        assert_eq!("symbol".parse::<QueryShape>().unwrap(), QueryShape::BySymbol);
        assert_eq!("BY_TYPE".parse::<QueryShape>().unwrap(), QueryShape::ByType);
        assert_eq!("1".parse::<QueryShape>().unwrap(), QueryShape::ByDate);
        assert!("by-price".parse::<QueryShape>().is_err());
        for shape in QueryShape::ALL {
            assert_eq!(shape.as_str().parse::<QueryShape>().unwrap(), shape);
        }
    }

    #[test]
    fn test_equality_columns_follow_registry() {
        assert_eq!(
            equality_columns(TradeView::ByAccountDate.schema()),
            vec!["account"]
        );
        assert_eq!(
            equality_columns(TradeView::ByAccountSymbolTypeDate.schema()),
            vec!["account", "symbol", "type"]
        );
    }

    #[test]
    fn test_day_range_is_half_open() {
        let day = NaiveDate::from_ymd_opt(2020, 3, 14).unwrap();
        let range = DateRange::day(day).unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2020, 3, 14, 0, 0, 0).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2020, 3, 14, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2020, 3, 15, 0, 0, 0).unwrap()));

        let (lower, upper) = range.bounds();
        let midnight_next = TradeId::at(Utc.with_ymd_and_hms(2020, 3, 15, 0, 0, 0).unwrap());
        assert!(midnight_next > upper);
        assert!(lower <= TradeId::at(range.start()));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let start = Utc.with_ymd_and_hms(2021, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert!(DateRange::new(start, end).unwrap_err().is_validation());
        assert!(DateRange::new(start, start).is_err());
    }

    #[test]
    fn test_default_window_is_latest_thirty_days() {
        let now = Utc.with_ymd_and_hms(2022, 6, 30, 12, 0, 0).unwrap();
        let range = DateWindow::default().resolve(now).unwrap();
        assert_eq!(range.start(), now - Duration::days(30));
        assert!(range.contains(now));
        assert!(DateWindow::Unbounded.resolve(now).is_none());
    }

    #[test]
    fn test_days_past_calendar_end_rejected() {
        assert!(DateRange::day(NaiveDate::MAX).unwrap_err().is_validation());
        assert!(DateRange::days(NaiveDate::MIN, NaiveDate::MAX)
            .unwrap_err()
            .is_validation());

        let last = NaiveDate::MAX.pred_opt().unwrap();
        let range = DateRange::day(last).unwrap();
        assert_eq!(range.end() - range.start(), Duration::days(1));
    }

    #[test]
    fn test_huge_latest_window_starts_at_earliest_instant() {
        let now = Utc.with_ymd_and_hms(2022, 6, 30, 12, 0, 0).unwrap();
        let range = DateWindow::Latest { days: u32::MAX }.resolve(now).unwrap();
        assert_eq!(range.start(), DateTime::<Utc>::MIN_UTC);
        assert!(range.contains(now));

        let (lower, upper) = range.bounds();
        assert_eq!(lower, TradeId::lower_bound(DateTime::<Utc>::MIN_UTC));
        assert!(upper >= TradeId::at(now));
    }

    #[test]
    fn test_latest_window_at_calendar_end() {
        let range = DateWindow::Latest { days: 1 }
            .resolve(DateTime::<Utc>::MAX_UTC)
            .unwrap();
        assert_eq!(range.end(), DateTime::<Utc>::MAX_UTC);
        assert!(range.start() < range.end());
    }
}
