//! kuma-core - Core library for Kuma
//!
//! This crate contains the time entry model, the libSQL storage layer, and the
//! last-write-wins reconciliation used by the Kuma sync backend.

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;

pub use error::{Error, Result};
pub use models::{TimeEntry, UserId};
pub use services::SyncService;
pub use sync::SyncResponse;
