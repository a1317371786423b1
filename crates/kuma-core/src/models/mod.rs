//! Data models for Kuma

mod time_entry;
mod user;

pub use time_entry::{parse_last_modified, TimeEntry};
pub use user::UserId;
