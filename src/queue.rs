//! Durable FIFO of mutations that could not reach the origin.
//!
//! Actions are removed only after the origin has confirmed them, so a crash
//! mid-drain replays the in-flight action again on the next drain.

use chrono::{DateTime, Utc};
use reqwest::Method;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use url::Url;

use crate::db::{parse_datetime, schema::OUTBOX_SCHEMA, Database};
use crate::error::{Error, Result};
use crate::net::{Headers, Network, Request};

/// A queued mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredAction {
  pub id: i64,
  pub url: Url,
  pub method: Method,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
}

impl DeferredAction {
  /// The exact request to replay.
  pub fn to_request(&self) -> Request {
    Request {
      headers: self.headers.clone(),
      body: self.body.clone(),
      ..Request::new(self.method.clone(), self.url.clone())
    }
  }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Actions confirmed by the origin and removed
  pub replayed: usize,
  /// Actions still queued afterwards
  pub remaining: usize,
  /// Actions discarded because they could never be sent
  pub dropped: usize,
  /// Another drain was already running; nothing was done
  pub already_running: bool,
}

pub struct DeferredActionQueue {
  db: Database,
  max_actions: usize,
  draining: AtomicBool,
}

/// Clears the single-flight flag however the drain exits.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

type ActionRow = (i64, String, String, String, Option<Vec<u8>>, String);

impl DeferredActionQueue {
  /// Open the queue database (`outbox.db`) inside `dir`.
  pub fn open(dir: &Path, max_actions: usize) -> Result<Self> {
    let db = Database::open_at(&dir.join("outbox.db"), OUTBOX_SCHEMA)?;
    Ok(Self::with_db(db, max_actions))
  }

  pub fn in_memory(max_actions: usize) -> Result<Self> {
    let db = Database::open_in_memory(OUTBOX_SCHEMA)?;
    Ok(Self::with_db(db, max_actions))
  }

  fn with_db(db: Database, max_actions: usize) -> Self {
    Self {
      db,
      max_actions: max_actions.max(1),
      draining: AtomicBool::new(false),
    }
  }

  /// Append `request` and return its id. Drops the oldest actions past the ceiling.
  pub fn enqueue(&self, request: &Request) -> Result<i64> {
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| Error::storage("Failed to serialize headers", e))?;

    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| Error::storage("Failed to begin transaction", e))?;

    tx.execute(
      "INSERT INTO deferred_actions (url, method, headers, body, enqueued_at)
       VALUES (?, ?, ?, ?, datetime('now'))",
      params![
        request.url.as_str(),
        request.method.as_str(),
        headers,
        request.body,
      ],
    )
    .map_err(|e| Error::storage("Failed to enqueue action", e))?;
    let id = tx.last_insert_rowid();

    let count: i64 = tx
      .query_row("SELECT COUNT(*) FROM deferred_actions", [], |row| {
        row.get(0)
      })
      .map_err(|e| Error::storage("Failed to count actions", e))?;

    let overflow = count - self.max_actions as i64;
    if overflow > 0 {
      tx.execute(
        "DELETE FROM deferred_actions WHERE id IN
         (SELECT id FROM deferred_actions ORDER BY id LIMIT ?)",
        params![overflow],
      )
      .map_err(|e| Error::storage("Failed to trim queue", e))?;
      warn!(
        dropped = overflow,
        max = self.max_actions,
        "deferred queue full, dropped oldest actions"
      );
    }

    tx.commit()
      .map_err(|e| Error::storage("Failed to commit transaction", e))?;

    Ok(id)
  }

  /// All queued actions, oldest first.
  pub fn pending(&self) -> Result<Vec<DeferredAction>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, enqueued_at FROM deferred_actions ORDER BY id",
      )
      .map_err(|e| Error::storage("Failed to prepare query", e))?;

    let rows: Vec<ActionRow> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| Error::storage("Failed to query actions", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| Error::storage("Failed to read action", e))?;

    rows.into_iter().map(decode_action).collect()
  }

  pub fn len(&self) -> Result<usize> {
    let conn = self.db.lock()?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM deferred_actions", [], |row| {
        row.get(0)
      })
      .map_err(|e| Error::storage("Failed to count actions", e))?;

    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  fn oldest(&self) -> Result<Option<DeferredAction>> {
    let conn = self.db.lock()?;

    let row: Option<ActionRow> = conn
      .query_row(
        "SELECT id, url, method, headers, body, enqueued_at FROM deferred_actions
         ORDER BY id LIMIT 1",
        [],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| Error::storage("Failed to query oldest action", e))?;

    row.map(decode_action).transpose()
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute("DELETE FROM deferred_actions WHERE id = ?", params![id])
      .map_err(|e| Error::storage("Failed to remove action", e))?;

    Ok(())
  }

  /// Replay queued actions oldest-first until the queue is empty or one fails.
  ///
  /// A network error or a 5xx answer stops the pass and keeps that action and
  /// everything behind it. Any other answer confirms delivery. An action that
  /// cannot even be built into a request is dropped.
  pub async fn drain_all<N: Network>(&self, network: &N) -> Result<DrainReport> {
    if self
      .draining
      .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      debug!("drain already in progress");
      return Ok(DrainReport {
        already_running: true,
        ..DrainReport::default()
      });
    }
    let _guard = DrainGuard(&self.draining);

    let mut replayed = 0;
    let mut dropped = 0;
    while let Some(action) = self.oldest()? {
      match network.fetch(&action.to_request()).await {
        Ok(response) if response.status >= 500 => {
          warn!(
            id = action.id,
            status = response.status,
            "origin rejected replay, will retry later"
          );
          break;
        }
        Ok(response) => {
          if !response.is_ok() {
            warn!(
              id = action.id,
              status = response.status,
              "origin refused deferred action, not retrying"
            );
          }
          self.remove(action.id)?;
          replayed += 1;
          info!(id = action.id, "synced offline action");
        }
        Err(err) if !err.is_network() => {
          warn!(id = action.id, error = %err, "dropping undeliverable action");
          self.remove(action.id)?;
          dropped += 1;
        }
        Err(err) => {
          warn!(id = action.id, error = %err, "failed to sync action");
          break;
        }
      }
    }

    let remaining = self.len()?;
    Ok(DrainReport {
      replayed,
      remaining,
      dropped,
      already_running: false,
    })
  }
}

fn decode_action(row: ActionRow) -> Result<DeferredAction> {
  let (id, url, method, headers, body, enqueued_at) = row;

  Ok(DeferredAction {
    id,
    url: Url::parse(&url).map_err(|e| Error::storage("Failed to parse stored url", e))?,
    method: Method::from_bytes(method.as_bytes())
      .map_err(|e| Error::storage("Failed to parse stored method", e))?,
    headers: serde_json::from_str(&headers)
      .map_err(|e| Error::storage("Failed to deserialize headers", e))?,
    body,
    enqueued_at: parse_datetime(&enqueued_at)?,
  })
}
