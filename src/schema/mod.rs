//! usage.row.v1 input schema and loaders
//!
//! Raw rows straight from the usage store, before any normalization. Loaders
//! cover JSON arrays, NDJSON and (with the `sqlite` feature) the store's
//! SQLite database.

mod adapter;
mod raw_row;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use adapter::*;
pub use raw_row::*;
