//! Database connection management

use crate::error::{Error, Result};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::schema;

/// Where the server keeps its time entries
#[derive(Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database (tests, throwaway servers)
    InMemory,
    /// Local `SQLite` file
    Local(String),
    /// Remote libSQL server (e.g. `libsql://your-db.turso.io`)
    Remote { url: String, auth_token: String },
}

impl DatabaseLocation {
    /// Resolve a `DATABASE_URL`-style value.
    ///
    /// `libsql://`, `http://` and `https://` URLs are remote and need a token;
    /// `:memory:` is in-memory; anything else is a local file path.
    pub fn parse(url: &str, auth_token: Option<&str>) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidInput("Database URL must not be empty".into()));
        }
        if url == ":memory:" {
            return Ok(Self::InMemory);
        }
        if is_remote_url(url) {
            let auth_token = auth_token
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .ok_or_else(|| {
                    Error::InvalidInput("Auth token is required for remote databases".into())
                })?;
            return Ok(Self::Remote {
                url: url.to_string(),
                auth_token: auth_token.to_string(),
            });
        }
        Ok(Self::Local(url.to_string()))
    }
}

impl std::fmt::Debug for DatabaseLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InMemory => f.write_str("InMemory"),
            Self::Local(path) => f.debug_tuple("Local").field(path).finish(),
            Self::Remote { url, .. } => f
                .debug_struct("Remote")
                .field("url", url)
                .field("auth_token", &"[REDACTED]")
                .finish(),
        }
    }
}

fn is_remote_url(url: &str) -> bool {
    url.starts_with("libsql://") || url.starts_with("http://") || url.starts_with("https://")
}

/// Database wrapper for libSQL connections
pub struct Database {
    // Keeps the handle alive for the lifetime of `conn`.
    _db: LibSqlDatabase,
    conn: Connection,
    remote: bool,
}

impl Database {
    /// Open the database at `location`, creating the schema if needed
    pub async fn open_location(location: &DatabaseLocation) -> Result<Self> {
        match location {
            DatabaseLocation::InMemory => Self::open_in_memory().await,
            DatabaseLocation::Local(path) => Self::open(path).await,
            DatabaseLocation::Remote { url, auth_token } => {
                Self::open_remote(url, auth_token).await
            }
        }
    }

    /// Open a local database at the given path, creating it if it doesn't exist
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let path_str = path.to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::init(db, false).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::init(db, false).await
    }

    /// Open a connection to a remote libSQL database
    pub async fn open_remote(url: &str, auth_token: &str) -> Result<Self> {
        let db = Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await?;
        Self::init(db, true).await
    }

    async fn init(db: LibSqlDatabase, remote: bool) -> Result<Self> {
        let conn = db.connect()?;
        let database = Self {
            _db: db,
            conn,
            remote,
        };
        database.configure().await?;
        schema::ensure(&database.conn).await?;
        Ok(database)
    }

    /// Configure `SQLite` for a long-running server process
    async fn configure(&self) -> Result<()> {
        if self.remote {
            // Pragmas are not forwarded to remote servers.
            return Ok(());
        }
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok(); // Not supported for in-memory databases
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA busy_timeout = 5000;", ()).await.ok();
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
