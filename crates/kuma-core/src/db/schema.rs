//! Schema bootstrap for the time entry store

use crate::error::Result;
use libsql::Connection;

/// Create the tables and indexes the server needs, if they are missing.
///
/// Every statement is idempotent so this runs on each start-up.
pub async fn ensure(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        // One row per (client id, owner); ids are only unique per user.
        "CREATE TABLE IF NOT EXISTS time_entries (
            id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            activity TEXT NOT NULL,
            elapsed REAL NOT NULL,
            description TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            timestamp TEXT NOT NULL,
            last_modified TEXT NOT NULL,
            last_modified_ms INTEGER NOT NULL,
            PRIMARY KEY (id, user_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_time_entries_user_modified
            ON time_entries(user_id, last_modified_ms DESC)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::debug!("Time entry schema is in place");
    Ok(())
}
