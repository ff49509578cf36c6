//! Synthetic data generation and bulk loading.

use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use trade_views_core::{Account, Position, Trade, TradeType};
use uuid::Builder;

use crate::config::LoaderConfig;
use crate::error::{StoreError, StoreResult};
use crate::writer::{FanOutWriter, WriteSummary};

/// Users accounts are assigned to, as `(username, display name)`
pub const USERS: [(&str, &str); 6] = [
    ("mike", "Michael Jones"),
    ("stacy", "Stacy Malibu"),
    ("john", "John Doe"),
    ("marie", "Marie Condo"),
    ("tom", "Tomas Train"),
    ("alan", "Alan Solorio"),
];

/// Symbols positions and trades are drawn from
pub const INSTRUMENTS: [&str; 28] = [
    "ETSY", "PINS", "SE", "SHOP", "SQ", "MELI", "ISRG", "DIS", "BRK.A", "AMZN", "VOO", "VEA",
    "VGT", "VIG", "MBB", "QQQ", "SPY", "BSV", "BND", "MUB", "VSMPX", "VFIAX", "FXAIX", "VTSAX",
    "SPAXX", "VMFXX", "FDRXX", "FGXX",
];

const MS_PER_DAY: i64 = 86_400_000;

/// How much synthetic data to generate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub accounts: usize,
    pub positions: usize,
    pub trades: usize,
    /// First day trades may fall on
    pub trades_from: NaiveDate,
    /// Day after the last day trades may fall on
    pub trades_until: NaiveDate,
}

impl From<&LoaderConfig> for LoadPlan {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            accounts: config.accounts,
            positions: config.positions,
            trades: config.trades,
            trades_from: config.trades_from,
            trades_until: config.trades_until,
        }
    }
}

impl LoadPlan {
    /// Rejects plans that cannot be satisfied
    pub fn validate(&self) -> StoreResult<()> {
        if self.accounts == 0 && (self.positions > 0 || self.trades > 0) {
            return Err(StoreError::Validation(
                "positions and trades need at least one account".to_string(),
            ));
        }

        let unique_pairs = self.accounts.saturating_mul(INSTRUMENTS.len());
        if self.positions > unique_pairs {
            return Err(StoreError::Validation(format!(
                "{} positions requested but only {} unique account/symbol pairs exist",
                self.positions, unique_pairs
            )));
        }

        if self.trades > 0 && self.trades_until <= self.trades_from {
            return Err(StoreError::Validation(format!(
                "trade dates {}..{} are empty",
                self.trades_from, self.trades_until
            )));
        }

        Ok(())
    }
}

/// Records produced by [`BulkLoader::generate`]
#[derive(Debug, Clone, Default)]
pub struct SyntheticData {
    pub accounts: Vec<Account>,
    pub positions: Vec<Position>,
    pub trades: Vec<Trade>,
}

/// Per-table outcome of a bulk load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub accounts: WriteSummary,
    pub positions: WriteSummary,
    pub trades: WriteSummary,
}

/// Generates synthetic records and writes them through a [`FanOutWriter`]
pub struct BulkLoader<'a> {
    writer: &'a FanOutWriter,
}

impl<'a> BulkLoader<'a> {
    pub fn new(writer: &'a FanOutWriter) -> Self {
        Self { writer }
    }

    /// Builds accounts, unique positions and trades for `plan`
    pub fn generate<R: Rng>(plan: &LoadPlan, rng: &mut R) -> StoreResult<SyntheticData> {
        plan.validate()?;

        let accounts: Vec<Account> = (0..plan.accounts)
            .map(|_| {
                let (username, display_name) = USERS[rng.gen_range(0..USERS.len())];
                Account {
                    username: username.to_string(),
                    account_number: Builder::from_random_bytes(rng.gen())
                        .into_uuid()
                        .to_string(),
                    cash_balance: random_amount(rng),
                    display_name: display_name.to_string(),
                }
            })
            .collect();

        let mut pairs = Vec::with_capacity(accounts.len() * INSTRUMENTS.len());
        for account in &accounts {
            for symbol in INSTRUMENTS {
                pairs.push((account.account_number.as_str(), symbol));
            }
        }
        let positions = pairs
            .choose_multiple(rng, plan.positions)
            .map(|(account, symbol)| {
                Position::new(*account, *symbol, Decimal::from(rng.gen_range(1..=500u32)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let days = (plan.trades_until - plan.trades_from).num_days();
        let start = Utc.from_utc_datetime(&plan.trades_from.and_time(NaiveTime::default()));
        let trades = (0..plan.trades)
            .map(|_| {
                let executed_at = start
                    + Duration::days(rng.gen_range(0..days))
                    + Duration::milliseconds(rng.gen_range(0..MS_PER_DAY));
                let account = &accounts[rng.gen_range(0..accounts.len())];
                let symbol = INSTRUMENTS[rng.gen_range(0..INSTRUMENTS.len())];
                let trade_type = if rng.gen_bool(0.5) {
                    TradeType::Buy
                } else {
                    TradeType::Sell
                };
                let shares = Decimal::from(rng.gen_range(1..=5000u32));
                Trade::at(
                    executed_at,
                    account.account_number.clone(),
                    trade_type,
                    symbol,
                    shares,
                    random_amount(rng),
                )
            })
            .collect();

        Ok(SyntheticData {
            accounts,
            positions,
            trades,
        })
    }

    /// Generates data for `plan` and writes it
    #[instrument(skip(self, rng))]
    pub async fn load<R: Rng>(
        &self,
        plan: &LoadPlan,
        rng: &mut R,
    ) -> StoreResult<LoadSummary> {
        let data = Self::generate(plan, rng)?;
        let summary = self.write(&data).await?;
        info!(
            "Loaded {} accounts, {} positions and {} trades",
            summary.accounts.records, summary.positions.records, summary.trades.records
        );
        Ok(summary)
    }

    /// Writes already generated records, accounts first
    pub async fn write(&self, data: &SyntheticData) -> StoreResult<LoadSummary> {
        let accounts = self.writer.write_accounts(&data.accounts).await?;
        let positions = self.writer.write_positions(&data.positions).await?;
        let trades = self.writer.write_trades(&data.trades).await?;
        Ok(LoadSummary {
            accounts,
            positions,
            trades,
        })
    }
}

/// Random amount between 0.10 and 100000.00
fn random_amount<R: Rng>(rng: &mut R) -> Decimal {
    Decimal::new(rng.gen_range(10..=10_000_000i64), 2)
}
