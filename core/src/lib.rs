//! # Trade Views Core
//!
//! Domain records (accounts, positions, trades) and the time-ordered
//! identifier used to cluster trades chronologically.

pub mod error;
pub mod trade_id;
pub mod types;

pub use error::*;
pub use trade_id::*;
pub use types::*;
