//! Command-line surface: argument parsing and result rendering.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures_util::TryStreamExt;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;
use trade_views_core::{Account, Position, Trade, TradeType};
use trade_views_database::{
    Backend, DateRange, DateWindow, LoadSummary, QueryShape, TradeQuery, TradeStore,
    MAX_TRADE_WINDOW_DAYS,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Storage backend, overriding the configuration
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Bulk load synthetic data with the configured sizes before the command
    #[arg(long)]
    pub seed: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendArg {
    Memory,
    Postgres,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Memory => Backend::Memory,
            BackendArg::Postgres => Backend::Postgres,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the keyspace and every table if absent
    Bootstrap,
    /// Generate and write synthetic accounts, positions and trades
    BulkLoad(BulkLoadArgs),
    /// List the accounts of a user
    Accounts { username: String },
    /// List the positions held in an account
    Positions { account: String },
    /// List the trades of an account, most recent first
    Trades(TradesArgs),
}

#[derive(Args, Debug)]
pub struct BulkLoadArgs {
    #[arg(long)]
    pub accounts: Option<usize>,
    #[arg(long)]
    pub positions: Option<usize>,
    #[arg(long)]
    pub trades: Option<usize>,
}

#[derive(Args, Debug)]
pub struct TradesArgs {
    pub account: String,

    /// Lookup to run; inferred from the filters when omitted
    #[arg(long)]
    pub shape: Option<QueryShape>,

    /// Only trades of this type (buy or sell)
    #[arg(long = "type")]
    pub trade_type: Option<TradeType>,

    /// Only trades of this symbol
    #[arg(long)]
    pub symbol: Option<String>,

    /// First day, inclusive
    #[arg(long, requires = "to", conflicts_with_all = ["all", "days"])]
    pub from: Option<NaiveDate>,

    /// Last day, inclusive
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Every trade regardless of date
    #[arg(long, conflicts_with = "days")]
    pub all: bool,

    /// Trades from the last N days
    #[arg(
        long,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_TRADE_WINDOW_DAYS))
    )]
    pub days: Option<u32>,

    /// Stop after this many trades
    #[arg(long)]
    pub limit: Option<usize>,
}

impl TradesArgs {
    pub fn query(&self) -> Result<TradeQuery> {
        let shape = self.shape.unwrap_or(match (&self.symbol, self.trade_type) {
            (Some(_), Some(_)) => QueryShape::BySymbolAndType,
            (Some(_), None) => QueryShape::BySymbol,
            (None, Some(_)) => QueryShape::ByType,
            (None, None) => QueryShape::ByDate,
        });
        Ok(TradeQuery::from_parts(
            shape,
            self.symbol.as_deref(),
            self.trade_type,
        )?)
    }

    pub fn window(&self, default: DateWindow) -> Result<DateWindow> {
        Ok(match (self.from, self.to) {
            (Some(from), Some(to)) => DateRange::days(from, to)?.into(),
            _ if self.all => DateWindow::Unbounded,
            _ => match self.days {
                Some(days) => DateWindow::Latest { days },
                None => default,
            },
        })
    }
}

/// Executes `command` against `store`, printing results to stdout
pub async fn run(store: &TradeStore, command: Command, as_json: bool) -> Result<()> {
    match command {
        Command::Bootstrap => {
            println!("Keyspace {} ready", store.config().keyspace.name);
        }
        Command::BulkLoad(args) => {
            let defaults = &store.config().loader;
            let summary = store
                .bulk_load(
                    args.accounts.unwrap_or(defaults.accounts),
                    args.positions.unwrap_or(defaults.positions),
                    args.trades.unwrap_or(defaults.trades),
                )
                .await?;
            print_summary(&summary, as_json)?;
        }
        Command::Accounts { username } => {
            let accounts = store.list_accounts(&username).await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&accounts)?);
            } else {
                print_accounts(&accounts);
            }
        }
        Command::Positions { account } => {
            let positions = store.list_positions(&account).await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&positions)?);
            } else {
                print_positions(&positions);
            }
        }
        Command::Trades(args) => {
            let query = args.query()?;
            let window = args.window(store.router().default_window())?;
            info!(shape = %query.shape(), ?window, "Listing trades");

            let mut trades = store.find_trades(&args.account, &query, window).await?;
            if !as_json {
                println!(
                    "{:<36}  {:<23}  {:<4}  {:>8}  {:<6}  {:>12}  {:>16}",
                    "trade_id", "executed_at", "type", "shares", "symbol", "price", "amount"
                );
            }

            let mut shown = 0usize;
            while let Some(trade) = trades.try_next().await? {
                if as_json {
                    println!("{}", serde_json::to_string(&trade)?);
                } else {
                    print_trade(&trade);
                }
                shown += 1;
                if args.limit.is_some_and(|limit| shown >= limit) {
                    break;
                }
            }
            info!("Listed {} trades", shown);
        }
    }
    Ok(())
}

fn print_summary(summary: &LoadSummary, as_json: bool) -> Result<()> {
    if as_json {
        let value = json!({
            "accounts": summary.accounts.records,
            "positions": summary.positions.records,
            "trades": summary.trades.records,
            "rows": summary.accounts.rows + summary.positions.rows + summary.trades.rows,
            "batches": summary.accounts.batches
                + summary.positions.batches
                + summary.trades.batches,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!(
            "Loaded {} accounts, {} positions and {} trades",
            summary.accounts.records, summary.positions.records, summary.trades.records
        );
    }
    Ok(())
}

fn print_accounts(accounts: &[Account]) {
    println!(
        "{:<10}  {:<36}  {:<20}  {:>14}",
        "username", "account_number", "name", "cash_balance"
    );
    for account in accounts {
        println!(
            "{:<10}  {:<36}  {:<20}  {:>14}",
            account.username,
            account.account_number,
            account.display_name,
            money(account.cash_balance)
        );
    }
}

fn print_positions(positions: &[Position]) {
    println!("{:<8}  {:>8}", "symbol", "quantity");
    for position in positions {
        println!("{:<8}  {:>8}", position.symbol, position.quantity);
    }
}

fn print_trade(trade: &Trade) {
    println!(
        "{:<36}  {:<23}  {:<4}  {:>8}  {:<6}  {:>12}  {:>16}",
        trade.trade_id.to_string(),
        trade.executed_at().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        trade.trade_type.as_str(),
        trade.shares,
        trade.symbol,
        money(trade.price),
        money(trade.amount)
    );
}

fn money(value: Decimal) -> String {
    value.round_dp(2).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("trade-views").chain(args.iter().copied())).unwrap()
    }

    fn trades_args(args: &[&str]) -> TradesArgs {
        let mut full = vec!["trades"];
        full.extend_from_slice(args);
        match parse(&full).command {
            Command::Trades(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_shape_inferred_from_filters() {
        let args = trades_args(&["A1", "--symbol", "SPY", "--type", "buy"]);
        assert_eq!(
            args.query().unwrap(),
            TradeQuery::BySymbolAndType {
                symbol: "SPY".to_string(),
                trade_type: TradeType::Buy
            }
        );
        assert_eq!(trades_args(&["A1"]).query().unwrap(), TradeQuery::ByDate);
        assert_eq!(
            trades_args(&["A1", "--type", "SELL"]).query().unwrap(),
            TradeQuery::ByType(TradeType::Sell)
        );
    }

    #[test]
    fn test_explicit_shape_must_match_filters() {
        let args = trades_args(&["A1", "--shape", "by-date", "--symbol", "SPY"]);
        assert!(args.query().is_err());
    }

    #[test]
    fn test_window_selection() {
        let default = DateWindow::Latest { days: 30 };
        assert_eq!(trades_args(&["A1"]).window(default).unwrap(), default);
        assert_eq!(
            trades_args(&["A1", "--all"]).window(default).unwrap(),
            DateWindow::Unbounded
        );
        assert_eq!(
            trades_args(&["A1", "--days", "7"]).window(default).unwrap(),
            DateWindow::Latest { days: 7 }
        );

        let window = trades_args(&["A1", "--from", "2020-01-01", "--to", "2020-01-31"])
            .window(default)
            .unwrap();
        let expected = DateRange::days(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 31).unwrap(),
        )
        .unwrap();
        assert_eq!(window, DateWindow::Between(expected));
    }

    #[test]
    fn test_window_out_of_range_rejected() {
        let default = DateWindow::default();
        let mut args = trades_args(&["A1", "--from", "2020-01-01", "--to", "2020-01-31"]);
        args.to = Some(NaiveDate::MAX);
        assert!(args.window(default).is_err());

        for days in ["0", "4294967295"] {
            let result = Cli::try_parse_from(["trade-views", "trades", "A1", "--days", days]);
            assert!(result.is_err(), "--days {days}");
        }
    }

    #[test]
    fn test_from_requires_to() {
        let result = Cli::try_parse_from(["trade-views", "trades", "A1", "--from", "2020-01-01"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = parse(&["--backend", "postgres", "--seed", "accounts", "mike", "--json"]);
        assert_eq!(cli.backend, Some(BackendArg::Postgres));
        assert!(cli.seed);
        assert!(cli.json);
        assert!(matches!(cli.command, Command::Accounts { ref username } if username == "mike"));
    }
}
