//! SQLite storage.
//!
//! A single connection behind a mutex. Callers run on blocking threads and
//! hold the lock only for the duration of one guarded statement.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::DatabaseConfig;
use crate::error::{GuardError, GuardResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL
);
";

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database and ensure the schema exists.
    /// `:memory:` opens a private in-memory database.
    pub fn open(config: &DatabaseConfig) -> GuardResult<Self> {
        let conn = if config.path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.path)?
        };
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %config.path, "Database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> GuardResult<R>) -> GuardResult<R> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| GuardError::internal("database mutex poisoned"))?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = Database::open(&DatabaseConfig {
            path: ":memory:".into(),
        })
        .unwrap();

        let count: i64 = db
            .with_conn(|c| {
                Ok(c.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = 'users'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_file_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("guard.db").to_string_lossy().into_owned(),
        };
        Database::open(&config).unwrap();
        assert!(Database::open(&config).is_ok());
    }
}
