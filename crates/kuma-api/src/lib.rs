//! kuma-api - HTTP backend for Kuma time entry sync.

pub mod auth;
pub mod auth_proxy;
pub mod cli;
pub mod config;
pub mod error;
pub mod routes;

pub use config::AppConfig;
pub use error::AppError;
pub use routes::{app_router, AppState};
