//! Projection of domain records into view rows and back.

use trade_views_core::{Account, Position, Trade, TradeId};

use crate::error::{StoreError, StoreResult};
use crate::schema::ViewSchema;
use crate::session::{Row, Value};

/// A record that can be written to and read from registry tables
pub trait ViewRecord: Sized {
    /// Value of `column` for this record, if the record has such a field
    fn column_value(&self, column: &str) -> Option<Value>;

    /// Rebuilds the record from a row of one of its tables
    fn from_row(row: &Row) -> StoreResult<Self>;

    /// Insert parameters for `table`, in its column order
    fn project(&self, table: &ViewSchema) -> StoreResult<Vec<Value>> {
        table
            .columns
            .iter()
            .map(|column| {
                self.column_value(column.name).ok_or_else(|| {
                    StoreError::Validation(format!(
                        "{} has no value for column {}",
                        table.name, column.name
                    ))
                })
            })
            .collect()
    }
}

impl ViewRecord for Account {
    fn column_value(&self, column: &str) -> Option<Value> {
        match column {
            "username" => Some(self.username.clone().into()),
            "account_number" => Some(self.account_number.clone().into()),
            "cash_balance" => Some(self.cash_balance.into()),
            "name" => Some(self.display_name.clone().into()),
            _ => None,
        }
    }

    fn from_row(row: &Row) -> StoreResult<Self> {
        Ok(Self {
            username: row.text("username")?.to_string(),
            account_number: row.text("account_number")?.to_string(),
            cash_balance: row.decimal("cash_balance")?,
            display_name: row.text("name")?.to_string(),
        })
    }
}

impl ViewRecord for Position {
    fn column_value(&self, column: &str) -> Option<Value> {
        match column {
            "account" => Some(self.account_number.clone().into()),
            "symbol" => Some(self.symbol.clone().into()),
            "quantity" => Some(self.quantity.into()),
            _ => None,
        }
    }

    fn from_row(row: &Row) -> StoreResult<Self> {
        Ok(Position::new(
            row.text("account")?,
            row.text("symbol")?,
            row.decimal("quantity")?,
        )?)
    }
}

impl ViewRecord for Trade {
    fn column_value(&self, column: &str) -> Option<Value> {
        match column {
            "account" => Some(self.account_number.clone().into()),
            "trade_id" => Some(self.trade_id.into()),
            "type" => Some(self.trade_type.into()),
            "symbol" => Some(self.symbol.clone().into()),
            "shares" => Some(self.shares.into()),
            "price" => Some(self.price.into()),
            "amount" => Some(self.amount.into()),
            _ => None,
        }
    }

    fn from_row(row: &Row) -> StoreResult<Self> {
        Ok(Self {
            trade_id: TradeId::from_uuid(row.uuid("trade_id")?),
            account_number: row.text("account")?.to_string(),
            trade_type: row.text("type")?.parse()?,
            symbol: row.text("symbol")?.to_string(),
            shares: row.decimal("shares")?,
            price: row.decimal("price")?,
            amount: row.decimal("amount")?,
        })
    }
}
