//! Shared services built on top of the database layer.

mod sync_service;

pub use sync_service::SyncService;
