//! SQL schemas. The response cache and the deferred queue live in separate files.

/// Schema for the response cache (`cache.db`).
pub const CACHE_SCHEMA: &str = r#"
-- One row per cache generation (e.g. my-quran-journey-static-v1.0.0)
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by (generation, request key hash)
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    vary TEXT NOT NULL DEFAULT '[]',
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_generation ON entries(generation);

-- Small key/value table (installed and serving versions)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Schema for the deferred action queue (`outbox.db`).
pub const OUTBOX_SCHEMA: &str = r#"
-- AUTOINCREMENT keeps ids monotonic even after the newest row is removed
CREATE TABLE IF NOT EXISTS deferred_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
