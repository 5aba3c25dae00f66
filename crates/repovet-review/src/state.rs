//! Key-value persistence for pipeline runs.
//!
//! The orchestrator only needs get/put/delete and a prefix scan, so the
//! backing store is swappable: [`SqliteStateStore`] for the CLI,
//! [`MemoryStateStore`] for tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use repovet_core::{RepovetError, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Durable key-value store with last-writer-wins `put`.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// SQLite-backed [`StateStore`].
///
/// # Examples
///
/// ```
/// use repovet_review::state::SqliteStateStore;
///
/// let store = SqliteStateStore::in_memory().unwrap();
/// ```
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open or create a store at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::State`] if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use repovet_review::state::SqliteStateStore;
    ///
    /// let store = SqliteStateStore::open(Path::new(".repovet/runs.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                RepovetError::State(format!(
                    "failed to create state directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path).map_err(|e| {
            RepovetError::State(format!("failed to open {}: {e}", path.display()))
        })?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RepovetError::State(format!("failed to create in-memory database: {e}"))
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )
        .map_err(|e| RepovetError::State(format!("failed to create schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| RepovetError::State("state connection poisoned".into()))?;
        f(&conn).map_err(|e| RepovetError::State(e.to_string()))
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| conn.execute("DELETE FROM kv WHERE key = ?1", params![key]).map(|_| ()))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }
}

/// In-memory [`StateStore`] backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<BTreeMap<String, String>>,
    writes: Mutex<usize>,
}

impl MemoryStateStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| RepovetError::State("memory store poisoned".into()))
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        if let Ok(mut writes) = self.writes.lock() {
            *writes += 1;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
