use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Core record types for the trade-views system.
///
/// Accounts, positions and trades are immutable once created; the storage
/// layer projects them into one or more physical views.
use crate::error::{ModelError, ModelResult};
use crate::trade_id::TradeId;

/// Account and instrument identifiers
pub type AccountNumber = String;
pub type Username = String;
pub type Symbol = String;

/// A brokerage account owned by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Owning user
    pub username: Username,

    /// Globally unique account number
    pub account_number: AccountNumber,

    /// Cash available in the account
    pub cash_balance: Decimal,

    /// User display name, shared by every account of the same user
    pub display_name: String,
}

impl Account {
    /// Opens an account with a freshly generated account number
    pub fn open(
        username: impl Into<String>,
        display_name: impl Into<String>,
        cash_balance: Decimal,
    ) -> Self {
        Self {
            username: username.into(),
            account_number: Uuid::new_v4().to_string(),
            cash_balance,
            display_name: display_name.into(),
        }
    }
}

/// Holding of one instrument in one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub account_number: AccountNumber,
    pub symbol: Symbol,
    pub quantity: Decimal,
}

impl Position {
    /// Creates a position, rejecting fractional or negative share counts
    pub fn new(
        account_number: impl Into<String>,
        symbol: impl Into<String>,
        quantity: Decimal,
    ) -> ModelResult<Self> {
        let symbol = symbol.into();
        if quantity.is_sign_negative() || !quantity.fract().is_zero() {
            return Err(ModelError::InvalidQuantity {
                symbol,
                quantity: quantity.to_string(),
            });
        }

        Ok(Self {
            account_number: account_number.into(),
            symbol,
            quantity,
        })
    }
}

/// Direction of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Buy,
    Sell,
}

impl TradeType {
    /// Stored representation, as it appears in the `type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Buy => "buy",
            TradeType::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(TradeType::Buy),
            "sell" => Ok(TradeType::Sell),
            other => Err(ModelError::InvalidTradeType(other.to_string())),
        }
    }
}

/// An executed trade.
///
/// `amount` is always `shares * price` for trades built through
/// [`Trade::new`] or [`Trade::at`]; [`Trade::validate`] re-checks the
/// invariant for records assembled field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub account_number: AccountNumber,
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    pub symbol: Symbol,
    pub shares: Decimal,
    pub price: Decimal,
    pub amount: Decimal,
}

impl Trade {
    /// Creates a trade executed now
    pub fn new(
        account_number: impl Into<String>,
        trade_type: TradeType,
        symbol: impl Into<String>,
        shares: Decimal,
        price: Decimal,
    ) -> Self {
        Self::at(Utc::now(), account_number, trade_type, symbol, shares, price)
    }

    /// Creates a trade executed at `executed_at`
    pub fn at(
        executed_at: DateTime<Utc>,
        account_number: impl Into<String>,
        trade_type: TradeType,
        symbol: impl Into<String>,
        shares: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            trade_id: TradeId::at(executed_at),
            account_number: account_number.into(),
            trade_type,
            symbol: symbol.into(),
            shares,
            price,
            amount: shares * price,
        }
    }

    /// When the trade was executed, recovered from its id
    pub fn executed_at(&self) -> DateTime<Utc> {
        self.trade_id.timestamp()
    }

    /// Checks the `amount == shares * price` invariant
    pub fn validate(&self) -> ModelResult<()> {
        if self.amount != self.shares * self.price {
            return Err(ModelError::AmountMismatch {
                shares: self.shares.to_string(),
                price: self.price.to_string(),
                amount: self.amount.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_amount_is_shares_times_price() {
        let trade = Trade::new("A1", TradeType::Buy, "SPY", dec!(10), dec!(100.0));
        assert_eq!(trade.amount, dec!(1000.0));
        assert!(trade.validate().is_ok());
    }

    #[test]
    fn test_tampered_amount_fails_validation() {
        let mut trade = Trade::new("A1", TradeType::Sell, "SPY", dec!(3), dec!(2.5));
        trade.amount = dec!(7);
        assert!(matches!(
            trade.validate(),
            Err(ModelError::AmountMismatch { .. })
        ));
    }

    #[test]
    fn test_trade_type_parsing() {
        assert_eq!("BUY".parse::<TradeType>().unwrap(), TradeType::Buy);
        assert_eq!(" sell ".parse::<TradeType>().unwrap(), TradeType::Sell);
        assert!("hold".parse::<TradeType>().is_err());
    }

    #[test]
    fn test_position_rejects_fractional_shares() {
        assert!(Position::new("A1", "ETSY", dec!(42)).is_ok());
        assert!(Position::new("A1", "ETSY", dec!(42.5)).is_err());
        assert!(Position::new("A1", "ETSY", dec!(-1)).is_err());
    }

    #[test]
    fn test_account_numbers_are_unique() {
        let a = Account::open("mike", "Michael Jones", dec!(10));
        let b = Account::open("mike", "Michael Jones", dec!(10));
        assert_ne!(a.account_number, b.account_number);
    }

    #[test]
    fn test_trade_serializes_type_field() {
        let trade = Trade::new("A1", TradeType::Buy, "SPY", dec!(1), dec!(1));
        let json = serde_json::to_value(&trade).unwrap();
        assert_eq!(json["type"], "buy");
    }
}
