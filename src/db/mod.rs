pub mod schema;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Mutex-guarded SQLite connection shared by the cache store and the deferred queue.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path` and apply `schema`.
  pub fn open_at(path: &Path, schema: &str) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::storage("Failed to create database directory", e))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::storage(&format!("Failed to open database at {}", path.display()), e)
    })?;

    Self::with_schema(conn, schema)
  }

  /// Open a private in-memory database, used when nothing should outlive the process.
  pub fn open_in_memory(schema: &str) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::storage("Failed to open in-memory database", e))?;
    Self::with_schema(conn, schema)
  }

  fn with_schema(conn: Connection, schema: &str) -> Result<Self> {
    conn
      .execute_batch(schema)
      .map_err(|e| Error::storage("Failed to run migrations", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default data directory
  pub fn default_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("offline-sync"))
  }

  /// Lock the connection for the duration of one operation.
  pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::storage("Lock poisoned", e))
  }
}

/// Parse a datetime string from SQLite format.
pub(crate) fn parse_datetime(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| Error::storage(&format!("Failed to parse datetime '{}'", s), e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_sqlite_datetime() {
    let parsed = parse_datetime("2024-03-01 12:30:45").unwrap();
    assert_eq!(parsed.to_rfc3339(), "2024-03-01T12:30:45+00:00");
  }

  #[test]
  fn test_parse_rejects_garbage() {
    let err = parse_datetime("yesterday").unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
  }

  #[test]
  fn test_open_at_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    Database::open_at(&path, schema::CACHE_SCHEMA).unwrap();

    assert!(path.exists());
  }
}
