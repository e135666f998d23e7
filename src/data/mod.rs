//! Data layer module
//!
//! Handles all record persistence:
//! - SQLite record store (media, thumbnails, engine state)
//! - Cursor-based query engine
//! - Export-flag ledger

mod cursor;
mod database;
mod ledger;
mod models;
mod query;

pub use cursor::Cursor;
pub use database::{Database, DatabaseOptions};
pub use models::*;
pub use query::MediaCriteria;
