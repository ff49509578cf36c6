//! # Database Layer
//!
//! Query-driven storage for accounts, positions and trades. Every lookup is
//! served by a table whose partition and clustering key match it; trades are
//! written to four such views. Runs on an in-memory sorted substrate or on
//! PostgreSQL behind the same [`Session`] trait.

pub mod config;
pub mod error;
pub mod loader;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod router;
pub mod schema;
pub mod session;
pub mod store;
pub mod writer;

// Re-export commonly used types
pub use config::*;
pub use error::*;
pub use loader::{BulkLoader, LoadPlan, LoadSummary, SyntheticData};
pub use memory::MemorySession;
pub use postgres::PgSession;
pub use records::ViewRecord;
pub use router::*;
pub use schema::*;
pub use session::*;
pub use store::TradeStore;
pub use writer::*;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
