//! Persistence and caching engine for a personal expense tracker.
//!
//! The store file is a schema-versioned SQLite database holding trips,
//! their receipts, and the lookup tables around them (categories, export
//! column configurations, payment methods). [`ReceiptStore`] is the
//! synchronized facade over it: serial operations are plain `async fn`s,
//! the `*_parallel` variants spawn the same work and deliver the result
//! over a oneshot channel. A merge engine imports another copy of the
//! store file record by record.

pub mod error;
pub mod logging;
pub mod model;
pub mod storage;
pub mod store;
pub mod time;

mod backup;
mod db;
mod merge;
mod schema;

pub use error::{AppError, AppResult};
pub use merge::IMPORT_LOG;
pub use schema::{StandardDefaults, TableDefaults, SCHEMA_VERSION};
pub use store::{AutoCompleteField, CategoryCost, ReceiptHint, ReceiptStore, StoreConfig, CURRENCY_CODES};
