//! Thread-safe sync service shared by request handlers.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, DatabaseLocation};
use crate::models::{TimeEntry, UserId};
use crate::sync::{self, ReconcileOutcome, SyncResponse};
use crate::Result;

/// Owns the database handle and runs sync requests against it.
///
/// Batches are serialized through the mutex, so two requests in the same
/// process never interleave inside one transaction.
#[derive(Clone)]
pub struct SyncService {
    db: Arc<Mutex<Database>>,
}

impl SyncService {
    /// Wrap an already opened database.
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the database at `location` and wrap it.
    pub async fn open(location: &DatabaseLocation) -> Result<Self> {
        tracing::info!("Opening time entry store at {:?}", location);
        let db = Database::open_location(location).await?;
        Ok(Self::new(db))
    }

    /// Open an in-memory sync service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory().await?))
    }

    /// Reconcile a client batch and report the user's full entry set.
    pub async fn sync(&self, user_id: &UserId, entries: &[TimeEntry]) -> Result<SyncResponse> {
        let (outcome, entries) = self.sync_with_outcome(user_id, entries).await?;
        Ok(SyncResponse {
            synced_ids: outcome.synced_ids,
            entries,
        })
    }

    /// Like [`Self::sync`], but also returns the per-resolution counts.
    pub async fn sync_with_outcome(
        &self,
        user_id: &UserId,
        entries: &[TimeEntry],
    ) -> Result<(ReconcileOutcome, Vec<TimeEntry>)> {
        let db = self.db.lock().await;
        let outcome = sync::reconcile_entries(db.connection(), user_id, entries).await?;
        let entries = sync::entries_for_user(db.connection(), user_id).await?;
        Ok((outcome, entries))
    }

    /// All entries owned by `user_id`, most recently modified first.
    pub async fn entries_for_user(&self, user_id: &UserId) -> Result<Vec<TimeEntry>> {
        let db = self.db.lock().await;
        sync::entries_for_user(db.connection(), user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn entry(id: &str, last_modified: &str) -> TimeEntry {
        TimeEntry {
            id: id.to_string(),
            activity: "Planning".to_string(),
            elapsed: 900.0,
            description: Some("weekly".to_string()),
            tags: vec!["meta".to_string()],
            timestamp: "2024-01-01T07:30:00Z".to_string(),
            last_modified: last_modified.to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_returns_ids_and_sorted_entries() {
        let service = SyncService::open_in_memory().await.unwrap();
        let alice = UserId::new("alice");

        let response = service
            .sync(
                &alice,
                &[
                    entry("a", "2024-01-01T00:00:00Z"),
                    entry("b", "2024-01-03T00:00:00Z"),
                    entry("c", "2024-01-02T00:00:00Z"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(response.synced_ids, vec!["a", "b", "c"]);
        let order: Vec<&str> = response.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_reports_entries_from_other_devices() {
        let service = SyncService::open_in_memory().await.unwrap();
        let alice = UserId::new("alice");

        service
            .sync(&alice, &[entry("from-desktop", "2024-01-01T00:00:00Z")])
            .await
            .unwrap();
        let response = service.sync(&alice, &[]).await.unwrap();

        assert!(response.synced_ids.is_empty());
        assert_eq!(response.entries, vec![entry("from-desktop", "2024-01-01T00:00:00Z")]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_entries_survive_reopen_of_file_database() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("kuma.db");
        let location = DatabaseLocation::Local(path.to_string_lossy().to_string());
        let alice = UserId::new("alice");

        {
            let service = SyncService::open(&location).await.unwrap();
            service
                .sync(&alice, &[entry("a", "2024-01-01T00:00:00Z")])
                .await
                .unwrap();
        }

        let reopened = SyncService::open(&location).await.unwrap();
        let entries = reopened.entries_for_user(&alice).await.unwrap();
        assert_eq!(entries, vec![entry("a", "2024-01-01T00:00:00Z")]);
    }
}
