//! Database layer for Kuma

mod connection;
mod repository;
mod schema;

pub use connection::{Database, DatabaseLocation};
pub use repository::{LibSqlTimeEntryRepository, TimeEntryRepository};
