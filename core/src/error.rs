//! Domain error types
//!
//! Errors raised while constructing or parsing domain records.

use thiserror::Error;

/// Errors produced by the domain model constructors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid trade type: {0} (expected 'buy' or 'sell')")]
    InvalidTradeType(String),

    #[error("Invalid quantity for {symbol}: {quantity} is not a whole, non-negative share count")]
    InvalidQuantity { symbol: String, quantity: String },

    #[error("Trade amount mismatch: {amount} != {shares} * {price}")]
    AmountMismatch {
        shares: String,
        price: String,
        amount: String,
    },

    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// Type alias for domain results
pub type ModelResult<T> = Result<T, ModelError>;
