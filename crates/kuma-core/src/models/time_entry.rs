//! Time entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A tracked block of time, as recorded by a client and stored per user.
///
/// `timestamp` and `last_modified` travel as strings and are stored verbatim so
/// a synced entry reads back exactly as the client sent it. Only
/// `last_modified` is interpreted, as the last-write-wins key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    /// Client-generated identifier, stable across sync cycles
    pub id: String,
    /// Short activity label
    pub activity: String,
    /// Tracked duration
    pub elapsed: f64,
    /// Optional free text
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered tag labels
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the activity occurred
    pub timestamp: String,
    /// When this entry was last changed (RFC 3339)
    pub last_modified: String,
}

impl TimeEntry {
    /// Parse `last_modified` as an RFC 3339 instant
    pub fn last_modified_at(&self) -> Result<DateTime<Utc>> {
        parse_last_modified(&self.last_modified).ok_or_else(|| {
            Error::InvalidInput(format!(
                "entry `{}` has an invalid last_modified: {:?}",
                self.id, self.last_modified
            ))
        })
    }

    /// Check the fields the server relies on before anything is written
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidInput("entry id must not be empty".into()));
        }
        if !self.elapsed.is_finite() {
            return Err(Error::InvalidInput(format!(
                "entry `{}` has a non-finite elapsed value",
                self.id
            )));
        }
        self.last_modified_at()?;
        Ok(())
    }
}

/// Parse an RFC 3339 timestamp into UTC, `None` if it is malformed
pub fn parse_last_modified(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
