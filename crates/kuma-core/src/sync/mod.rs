//! Last-write-wins reconciliation of client batches against stored entries.
//!
//! A batch is validated up front, then applied entry by entry inside a single
//! transaction. Each entry is inserted when unseen, overwrites the stored row
//! when its `last_modified` is strictly later, and is otherwise dropped
//! silently. Every submitted id is reported back as synced either way.

use libsql::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{LibSqlTimeEntryRepository, TimeEntryRepository};
use crate::error::{Error, Result};
use crate::models::{TimeEntry, UserId};

/// What happened to one incoming entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No stored entry existed; the incoming one was inserted
    Inserted,
    /// The incoming entry was newer and replaced the stored one
    Updated,
    /// The stored entry was as new or newer; nothing changed
    Stale,
}

/// Decide the outcome for `incoming` given what is stored for the same id.
///
/// Only a strictly later `last_modified` wins; equal timestamps keep the
/// stored entry.
pub fn resolve(incoming: &TimeEntry, existing: Option<&TimeEntry>) -> Result<Resolution> {
    let Some(existing) = existing else {
        return Ok(Resolution::Inserted);
    };

    let incoming_at = incoming.last_modified_at()?;
    let existing_at = existing.last_modified_at().map_err(|_| {
        Error::Database(format!(
            "stored entry `{}` has an unparseable last_modified: {:?}",
            existing.id, existing.last_modified
        ))
    })?;

    if incoming_at > existing_at {
        Ok(Resolution::Updated)
    } else {
        Ok(Resolution::Stale)
    }
}

/// Result of reconciling one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Every submitted id, in submission order, whether applied or stale
    pub synced_ids: Vec<String>,
    /// Entries the store had not seen for this user
    pub inserted: usize,
    /// Stored entries overwritten by a strictly newer copy
    pub updated: usize,
    /// Entries acknowledged but superseded by the stored copy
    pub stale: usize,
}

impl ReconcileOutcome {
    fn record(&mut self, id: &str, resolution: Resolution) {
        match resolution {
            Resolution::Inserted => self.inserted += 1,
            Resolution::Updated => self.updated += 1,
            Resolution::Stale => self.stale += 1,
        }
        self.synced_ids.push(id.to_string());
    }
}

/// Response body of a sync request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Ids accepted from the request (applied or superseded)
    pub synced_ids: Vec<String>,
    /// All of the user's entries, most recently modified first
    pub entries: Vec<TimeEntry>,
}

/// Reject the batch if any entry is unusable, before anything is written
pub fn validate_batch(entries: &[TimeEntry]) -> Result<()> {
    entries.iter().try_for_each(TimeEntry::validate)
}

/// Reconcile a client batch for `user_id` in one transaction.
///
/// On any storage error the whole batch is rolled back.
pub async fn reconcile_entries(
    conn: &Connection,
    user_id: &UserId,
    entries: &[TimeEntry],
) -> Result<ReconcileOutcome> {
    validate_batch(entries)?;

    conn.execute("BEGIN TRANSACTION", ()).await?;

    let outcome = match apply_batch(&LibSqlTimeEntryRepository::new(conn), user_id, entries).await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e);
        }
    };

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(outcome)
}

/// Apply entries one at a time through `repo`, in order
pub async fn apply_batch(
    repo: &impl TimeEntryRepository,
    user_id: &UserId,
    entries: &[TimeEntry],
) -> Result<ReconcileOutcome> {
    let mut outcome = ReconcileOutcome::default();

    for entry in entries {
        let existing = repo.get(user_id, &entry.id).await?;
        let resolution = resolve(entry, existing.as_ref())?;

        match resolution {
            Resolution::Inserted => repo.insert(user_id, entry).await?,
            Resolution::Updated => {
                if !repo.update(user_id, entry).await? {
                    return Err(Error::Database(format!(
                        "entry `{}` disappeared during sync",
                        entry.id
                    )));
                }
            }
            Resolution::Stale => {
                tracing::debug!(entry = %entry.id, "Dropping stale entry");
            }
        }

        outcome.record(&entry.id, resolution);
    }

    Ok(outcome)
}

/// Every entry owned by `user_id`, most recently modified first
pub async fn entries_for_user(conn: &Connection, user_id: &UserId) -> Result<Vec<TimeEntry>> {
    LibSqlTimeEntryRepository::new(conn)
        .list_for_user(user_id)
        .await
}
