//! Database module for Uptimer.
//!
//! Provides SQLite storage with an embedded schema migration.

mod models;
mod store;

pub use models::*;
pub use store::*;
