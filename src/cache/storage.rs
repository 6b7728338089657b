//! SQLite cache storage and bulk priming.

use futures::future::join_all;
use reqwest::Method;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;
use url::Url;

use super::traits::{
  CacheEntry, CacheGeneration, CacheHandle, CacheStorage, GenerationKind, RequestKey,
};
use crate::db::{parse_datetime, schema::CACHE_SCHEMA, Database};
use crate::error::{Error, Result};
use crate::net::{Headers, Network, Request, Response};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  /// Open the cache database (`cache.db`) inside `dir`.
  pub fn open(dir: &Path) -> Result<Self> {
    let db = Database::open_at(&dir.join("cache.db"), CACHE_SCHEMA)?;
    Ok(Self { db })
  }

  pub fn in_memory() -> Result<Self> {
    let db = Database::open_in_memory(CACHE_SCHEMA)?;
    Ok(Self { db })
  }
}

fn insert_entry(
  conn: &Connection,
  handle: &CacheHandle,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| Error::storage("Failed to serialize headers", e))?;
  let vary =
    serde_json::to_string(&key.vary).map_err(|e| Error::storage("Failed to serialize key", e))?;

  // Refuses to write into a generation that was deleted underneath us
  let inserted = conn
    .execute(
      "INSERT OR REPLACE INTO entries (generation, key_hash, method, url, vary, status, headers, body, stored_at)
       SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now')
       WHERE EXISTS (SELECT 1 FROM generations WHERE name = ?1)",
      params![
        handle.name(),
        key.cache_hash(),
        key.method.as_str(),
        key.url.as_str(),
        vary,
        response.status,
        headers,
        response.body,
      ],
    )
    .map_err(|e| Error::storage("Failed to store entry", e))?;

  if inserted == 0 {
    return Err(Error::Storage(format!(
      "Generation {} no longer exists",
      handle.name()
    )));
  }

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str, kind: GenerationKind) -> Result<CacheHandle> {
    let conn = self.db.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name, kind, created_at) VALUES (?, ?, datetime('now'))",
        params![name, kind.as_str()],
      )
      .map_err(|e| Error::storage("Failed to open generation", e))?;

    Ok(CacheHandle::new(name, kind))
  }

  fn generations(&self) -> Result<Vec<CacheGeneration>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare("SELECT name, kind, created_at FROM generations ORDER BY created_at, name")
      .map_err(|e| Error::storage("Failed to prepare query", e))?;

    let rows: Vec<(String, String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| Error::storage("Failed to list generations", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| Error::storage("Failed to read generation", e))?;

    rows
      .into_iter()
      .map(|(name, kind, created_at)| {
        let kind = GenerationKind::parse(&kind)
          .ok_or_else(|| Error::Storage(format!("Unknown generation kind '{}'", kind)))?;
        Ok(CacheGeneration {
          name,
          kind,
          created_at: parse_datetime(&created_at)?,
        })
      })
      .collect()
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| Error::storage("Failed to begin transaction", e))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![name])
      .map_err(|e| Error::storage("Failed to delete entries", e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![name])
      .map_err(|e| Error::storage("Failed to delete generation", e))?;

    tx.commit()
      .map_err(|e| Error::storage("Failed to commit transaction", e))?;

    Ok(removed > 0)
  }

  fn match_entry(&self, handle: &CacheHandle, key: &RequestKey) -> Result<Option<CacheEntry>> {
    let conn = self.db.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE generation = ? AND key_hash = ?",
        params![handle.name(), key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| Error::storage("Failed to query entry", e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| Error::storage("Failed to deserialize headers", e))?;
        Ok(Some(CacheEntry {
          key: key.clone(),
          response: Response::new(status, headers, body),
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, handle: &CacheHandle, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.db.lock()?;
    insert_entry(&conn, handle, key, response)
  }

  fn put_all(&self, handle: &CacheHandle, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| Error::storage("Failed to begin transaction", e))?;

    for (key, response) in entries {
      insert_entry(&tx, handle, key, response)?;
    }

    tx.commit()
      .map_err(|e| Error::storage("Failed to commit transaction", e))?;

    Ok(())
  }

  fn delete(&self, handle: &CacheHandle, key: &RequestKey) -> Result<bool> {
    let conn = self.db.lock()?;

    let removed = conn
      .execute(
        "DELETE FROM entries WHERE generation = ? AND key_hash = ?",
        params![handle.name(), key.cache_hash()],
      )
      .map_err(|e| Error::storage("Failed to delete entry", e))?;

    Ok(removed > 0)
  }

  fn entry_count(&self, handle: &CacheHandle) -> Result<usize> {
    let conn = self.db.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![handle.name()],
        |row| row.get(0),
      )
      .map_err(|e| Error::storage("Failed to count entries", e))?;

    Ok(count as usize)
  }

  fn meta(&self, key: &str) -> Result<Option<String>> {
    let conn = self.db.lock()?;

    conn
      .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| Error::storage("Failed to read meta", e))
  }

  fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| Error::storage("Failed to write meta", e))?;

    Ok(())
  }
}

/// Fetch every URL and commit the responses as one batch.
///
/// If any fetch fails or comes back with a non-ok status, nothing is stored.
pub async fn add_all<S, N>(
  storage: &S,
  network: &N,
  handle: &CacheHandle,
  urls: &[Url],
) -> Result<()>
where
  S: CacheStorage + ?Sized,
  N: Network,
{
  let requests: Vec<Request> = urls.iter().cloned().map(Request::get).collect();
  let results = join_all(requests.iter().map(|request| network.fetch(request))).await;

  let mut entries = Vec::with_capacity(requests.len());
  for (request, result) in requests.iter().zip(results) {
    let response = result?;
    if !response.is_ok() {
      return Err(Error::Network(format!(
        "{} returned status {}",
        request.url, response.status
      )));
    }
    entries.push((RequestKey::new(Method::GET, request.url.clone()), response));
  }

  storage.put_all(handle, &entries)?;
  debug!(generation = handle.name(), count = entries.len(), "primed cache");

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{json, url, MockNetwork};

  fn storage_with(name: &str, kind: GenerationKind) -> (SqliteStorage, CacheHandle) {
    let storage = SqliteStorage::in_memory().unwrap();
    let handle = storage.open(name, kind).unwrap();
    (storage, handle)
  }

  #[test]
  fn test_put_then_match_is_byte_identical() {
    let (storage, handle) = storage_with("app-dynamic-v1", GenerationKind::Dynamic);
    let key = RequestKey::new(Method::GET, url("/api/quran/reciters"));
    let response = Response::new(
      200,
      vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("ETag".to_string(), "\"abc\"".to_string()),
      ],
      vec![0u8, 159, 146, 150, b'{', b'}'],
    );

    storage.put(&handle, &key, &response).unwrap();
    let entry = storage.match_entry(&handle, &key).unwrap().unwrap();

    assert_eq!(entry.response, response);
    assert_eq!(entry.key, key);
  }

  #[test]
  fn test_put_replaces_by_key() {
    let (storage, handle) = storage_with("app-dynamic-v1", GenerationKind::Dynamic);
    let key = RequestKey::new(Method::GET, url("/api/quran/chapters"));

    storage.put(&handle, &key, &json(200, "[1]")).unwrap();
    storage.put(&handle, &key, &json(200, "[1,2]")).unwrap();

    let entry = storage.match_entry(&handle, &key).unwrap().unwrap();
    assert_eq!(entry.response.body, b"[1,2]");
    assert_eq!(storage.entry_count(&handle).unwrap(), 1);
  }

  #[test]
  fn test_generations_are_isolated() {
    let storage = SqliteStorage::in_memory().unwrap();
    let stat = storage.open("app-static-v1", GenerationKind::Static).unwrap();
    let dynamic = storage.open("app-dynamic-v1", GenerationKind::Dynamic).unwrap();
    let key = RequestKey::new(Method::GET, url("/"));

    storage.put(&stat, &key, &json(200, "shell")).unwrap();

    assert!(storage.match_entry(&dynamic, &key).unwrap().is_none());
    assert!(storage.match_entry(&stat, &key).unwrap().is_some());
  }

  #[test]
  fn test_delete_entry() {
    let (storage, handle) = storage_with("app-dynamic-v1", GenerationKind::Dynamic);
    let key = RequestKey::new(Method::GET, url("/api/quran/chapters"));
    storage.put(&handle, &key, &json(200, "[]")).unwrap();

    assert!(storage.delete(&handle, &key).unwrap());
    assert!(!storage.delete(&handle, &key).unwrap());
    assert!(storage.match_entry(&handle, &key).unwrap().is_none());
  }

  #[test]
  fn test_delete_generation_removes_entries() {
    let (storage, handle) = storage_with("app-static-v0", GenerationKind::Static);
    let key = RequestKey::new(Method::GET, url("/"));
    storage.put(&handle, &key, &json(200, "old shell")).unwrap();

    assert!(storage.delete_generation("app-static-v0").unwrap());
    assert!(storage.generations().unwrap().is_empty());
    assert!(storage.match_entry(&handle, &key).unwrap().is_none());
    assert!(!storage.delete_generation("app-static-v0").unwrap());
  }

  #[test]
  fn test_put_into_deleted_generation_is_rejected() {
    let (storage, handle) = storage_with("app-dynamic-v0", GenerationKind::Dynamic);
    storage.delete_generation("app-dynamic-v0").unwrap();

    let key = RequestKey::new(Method::GET, url("/api/quran/chapters"));
    let err = storage.put(&handle, &key, &json(200, "[]")).unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    assert!(storage.generations().unwrap().is_empty());
  }

  #[test]
  fn test_reopen_keeps_kind_and_entries() {
    let (storage, handle) = storage_with("app-static-v1", GenerationKind::Static);
    let key = RequestKey::new(Method::GET, url("/manifest.json"));
    storage.put(&handle, &key, &json(200, "{}")).unwrap();

    let again = storage.open("app-static-v1", GenerationKind::Static).unwrap();

    assert_eq!(storage.generations().unwrap().len(), 1);
    assert!(storage.match_entry(&again, &key).unwrap().is_some());
  }

  #[test]
  fn test_entries_survive_reopening_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let key = RequestKey::new(Method::GET, url("/api/quran/chapters"));

    {
      let storage = SqliteStorage::open(dir.path()).unwrap();
      let handle = storage.open("app-dynamic-v1", GenerationKind::Dynamic).unwrap();
      storage.put(&handle, &key, &json(200, "[1]")).unwrap();
      storage.set_meta("serving_version", "1.0.0").unwrap();
    }

    let storage = SqliteStorage::open(dir.path()).unwrap();
    let handle = storage.open("app-dynamic-v1", GenerationKind::Dynamic).unwrap();
    let entry = storage.match_entry(&handle, &key).unwrap().unwrap();

    assert_eq!(entry.response.body, b"[1]");
    assert_eq!(
      storage.meta("serving_version").unwrap().as_deref(),
      Some("1.0.0")
    );
  }

  #[tokio::test]
  async fn test_add_all_commits_every_url() {
    let (storage, handle) = storage_with("app-static-v1", GenerationKind::Static);
    let network = MockNetwork::new();
    network.route("/", json(200, "<html>"));
    network.route("/manifest.json", json(200, "{}"));

    add_all(&storage, &network, &handle, &[url("/"), url("/manifest.json")])
      .await
      .unwrap();

    assert_eq!(storage.entry_count(&handle).unwrap(), 2);
  }

  #[tokio::test]
  async fn test_add_all_is_all_or_nothing() {
    let (storage, handle) = storage_with("app-static-v1", GenerationKind::Static);
    let network = MockNetwork::new();
    network.route("/", json(200, "<html>"));
    network.fail("/static/js/bundle.js");

    let err = add_all(
      &storage,
      &network,
      &handle,
      &[url("/"), url("/static/js/bundle.js")],
    )
    .await
    .unwrap_err();

    assert!(err.is_network());
    assert_eq!(storage.entry_count(&handle).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_add_all_rejects_error_status() {
    let (storage, handle) = storage_with("app-static-v1", GenerationKind::Static);
    let network = MockNetwork::new();
    network.route("/", json(200, "<html>"));
    network.route("/static/css/main.css", json(404, "missing"));

    let result = add_all(
      &storage,
      &network,
      &handle,
      &[url("/"), url("/static/css/main.css")],
    )
    .await;

    assert!(result.is_err());
    assert_eq!(storage.entry_count(&handle).unwrap(), 0);
  }
}
