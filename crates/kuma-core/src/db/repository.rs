//! Time entry repository implementation

use crate::error::{Error, Result};
use crate::models::{parse_last_modified, TimeEntry, UserId};
use libsql::{params, Connection};

/// Trait for per-user time entry storage operations (async)
///
/// Every operation is scoped by the owning user; there is no way to reach
/// another user's rows through this interface.
#[allow(async_fn_in_trait)]
pub trait TimeEntryRepository {
    /// Get an entry by client id
    async fn get(&self, user_id: &UserId, id: &str) -> Result<Option<TimeEntry>>;

    /// Insert a new entry
    async fn insert(&self, user_id: &UserId, entry: &TimeEntry) -> Result<()>;

    /// Overwrite every mutable field of an existing entry.
    ///
    /// Returns `false` if no row matched.
    async fn update(&self, user_id: &UserId, entry: &TimeEntry) -> Result<bool>;

    /// List all of a user's entries, most recently modified first
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<TimeEntry>>;
}

/// libSQL implementation of `TimeEntryRepository`
pub struct LibSqlTimeEntryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlTimeEntryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an entry from a database row
    fn parse_entry(row: &libsql::Row) -> Result<TimeEntry> {
        let tags: String = row.get(4)?;
        Ok(TimeEntry {
            id: row.get(0)?,
            activity: row.get(1)?,
            elapsed: row.get(2)?,
            description: row.get(3)?,
            tags: serde_json::from_str(&tags)?,
            timestamp: row.get(5)?,
            last_modified: row.get(6)?,
        })
    }

    fn last_modified_ms(entry: &TimeEntry) -> Result<i64> {
        parse_last_modified(&entry.last_modified)
            .map(|at| at.timestamp_millis())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "entry `{}` has an invalid last_modified: {:?}",
                    entry.id, entry.last_modified
                ))
            })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, activity, elapsed, description, tags, timestamp, last_modified FROM time_entries";

impl TimeEntryRepository for LibSqlTimeEntryRepository<'_> {
    async fn get(&self, user_id: &UserId, id: &str) -> Result<Option<TimeEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!("{SELECT_COLUMNS} WHERE id = ? AND user_id = ?"),
                params![id, user_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, user_id: &UserId, entry: &TimeEntry) -> Result<()> {
        let tags = serde_json::to_string(&entry.tags)?;
        let last_modified_ms = Self::last_modified_ms(entry)?;

        self.conn
            .execute(
                "INSERT INTO time_entries
                 (id, user_id, activity, elapsed, description, tags, timestamp, last_modified, last_modified_ms)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.id.as_str(),
                    user_id.as_str(),
                    entry.activity.as_str(),
                    entry.elapsed,
                    entry.description.clone(),
                    tags,
                    entry.timestamp.as_str(),
                    entry.last_modified.as_str(),
                    last_modified_ms
                ],
            )
            .await?;

        Ok(())
    }

    async fn update(&self, user_id: &UserId, entry: &TimeEntry) -> Result<bool> {
        let tags = serde_json::to_string(&entry.tags)?;
        let last_modified_ms = Self::last_modified_ms(entry)?;

        let rows = self
            .conn
            .execute(
                "UPDATE time_entries SET
                 activity = ?, elapsed = ?, description = ?, tags = ?,
                 timestamp = ?, last_modified = ?, last_modified_ms = ?
                 WHERE id = ? AND user_id = ?",
                params![
                    entry.activity.as_str(),
                    entry.elapsed,
                    entry.description.clone(),
                    tags,
                    entry.timestamp.as_str(),
                    entry.last_modified.as_str(),
                    last_modified_ms,
                    entry.id.as_str(),
                    user_id.as_str()
                ],
            )
            .await?;

        Ok(rows > 0)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<TimeEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "{SELECT_COLUMNS} WHERE user_id = ? ORDER BY last_modified_ms DESC, id ASC"
                ),
                [user_id.as_str()],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn entry(id: &str, last_modified: &str) -> TimeEntry {
        TimeEntry {
            id: id.to_string(),
            activity: "Deep work".to_string(),
            elapsed: 1500.5,
            description: Some("kuma sync server".to_string()),
            tags: vec!["rust".to_string(), "backend".to_string()],
            timestamp: "2024-01-01T09:00:00Z".to_string(),
            last_modified: last_modified.to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_get_round_trips_verbatim() {
        let db = setup().await;
        let repo = LibSqlTimeEntryRepository::new(db.connection());
        let alice = UserId::new("alice");

        let original = entry("a", "2024-01-01T00:00:00.000+01:00");
        repo.insert(&alice, &original).await.unwrap();

        let fetched = repo.get(&alice, "a").await.unwrap().unwrap();
        assert_eq!(fetched, original);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_is_scoped_by_user() {
        let db = setup().await;
        let repo = LibSqlTimeEntryRepository::new(db.connection());

        repo.insert(&UserId::new("alice"), &entry("a", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert!(repo.get(&UserId::new("bob"), "a").await.unwrap().is_none());
        assert!(repo.list_for_user(&UserId::new("bob")).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_overwrites_all_mutable_fields() {
        let db = setup().await;
        let repo = LibSqlTimeEntryRepository::new(db.connection());
        let alice = UserId::new("alice");

        repo.insert(&alice, &entry("a", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        let newer = TimeEntry {
            activity: "Review".to_string(),
            elapsed: 42.0,
            description: None,
            tags: vec![],
            timestamp: "2024-01-02T10:00:00Z".to_string(),
            ..entry("a", "2024-01-03T00:00:00Z")
        };
        assert!(repo.update(&alice, &newer).await.unwrap());

        let fetched = repo.get(&alice, "a").await.unwrap().unwrap();
        assert_eq!(fetched, newer);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_missing_row_reports_false() {
        let db = setup().await;
        let repo = LibSqlTimeEntryRepository::new(db.connection());

        let updated = repo
            .update(&UserId::new("alice"), &entry("ghost", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_orders_by_last_modified_desc() {
        let db = setup().await;
        let repo = LibSqlTimeEntryRepository::new(db.connection());
        let alice = UserId::new("alice");

        repo.insert(&alice, &entry("old", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        repo.insert(&alice, &entry("mid", "2024-01-02T00:00:00Z"))
            .await
            .unwrap();
        // Sorts after "mid" as text, but is 2024-01-01T22:00:00Z.
        repo.insert(&alice, &entry("offset", "2024-01-02T03:00:00+05:00"))
            .await
            .unwrap();

        let ids: Vec<String> = repo
            .list_for_user(&alice)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec!["mid", "offset", "old"]);
    }
}
