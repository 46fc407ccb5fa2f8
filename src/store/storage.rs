//! Cache store trait and its SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::Mutex;
use url::Url;

use super::types::{CacheEntryMeta, RequestIdentity, StoredResponse};

/// Storage backend for named cache generations.
///
/// Each generation maps a `RequestIdentity` to at most one `StoredResponse`.
/// Writes are idempotent replacements, so concurrent writers for the same
/// identity need no coordination.
pub trait CacheStore: Send + Sync {
  /// Ensure a generation exists. Safe to call for an existing generation.
  fn create_generation(&self, generation: &str) -> Result<()>;

  /// Delete a generation and all of its entries.
  fn delete_generation(&self, generation: &str) -> Result<()>;

  /// Names of all existing generations, in creation order.
  fn list_generations(&self) -> Result<Vec<String>>;

  /// Store a response under an identity, replacing any previous entry.
  ///
  /// Creates the generation if it does not exist yet, so opportunistic
  /// writes never depend on a prior `create_generation` call.
  fn put(
    &self,
    generation: &str,
    identity: &RequestIdentity,
    response: &StoredResponse,
  ) -> Result<()>;

  /// Look up the stored response for an identity.
  fn get(&self, generation: &str, identity: &RequestIdentity)
    -> Result<Option<StoredResponse>>;

  /// Remove a single entry. Removing a missing entry is not an error.
  fn remove(&self, generation: &str, identity: &RequestIdentity) -> Result<()>;

  /// Enumerate entry metadata for a generation.
  fn list_entries(&self, generation: &str) -> Result<Vec<CacheEntryMeta>>;
}

/// Schema for the cache database.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    captured_at TEXT NOT NULL,
    PRIMARY KEY (generation, entry_key),
    FOREIGN KEY (generation) REFERENCES generations(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_generation ON entries(generation);
"#;

/// SQLite-backed cache store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location under the user data directory.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open the store at an explicit path.
  pub fn open_at(path: &std::path::Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a store backed by an in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch("PRAGMA foreign_keys = ON;")
      .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CacheStore for SqliteStore {
  fn create_generation(&self, generation: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?, ?)",
        params![generation, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;

    Ok(())
  }

  fn delete_generation(&self, generation: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM entries WHERE generation = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;
    conn
      .execute("DELETE FROM generations WHERE name = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    Ok(())
  }

  fn list_generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare generation query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read generation row: {}", e))?;

    Ok(names)
  }

  fn put(
    &self,
    generation: &str,
    identity: &RequestIdentity,
    response: &StoredResponse,
  ) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_vec(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?, ?)",
        params![generation, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entries
         (generation, entry_key, method, url, status, headers, body, captured_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          generation,
          identity.storage_key(),
          identity.method(),
          identity.url().as_str(),
          response.status,
          headers,
          response.body,
          response.captured_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store entry for {}: {}", identity.url(), e))?;

    Ok(())
  }

  fn get(
    &self,
    generation: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, captured_at FROM entries
         WHERE generation = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![generation, identity.storage_key()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry for {}: {}", identity.url(), e))?;

    match row {
      Some((status, headers, body, captured_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_slice(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(StoredResponse {
          status,
          headers,
          body,
          captured_at: parse_datetime(&captured_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn remove(&self, generation: &str, identity: &RequestIdentity) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM entries WHERE generation = ? AND entry_key = ?",
        params![generation, identity.storage_key()],
      )
      .map_err(|e| eyre!("Failed to remove entry for {}: {}", identity.url(), e))?;

    Ok(())
  }

  fn list_entries(&self, generation: &str) -> Result<Vec<CacheEntryMeta>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT url, captured_at FROM entries
         WHERE generation = ? ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare entry listing: {}", e))?;

    let rows: Vec<(String, String)> = stmt
      .query_map(params![generation], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to list entries: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read entry row: {}", e))?;

    let mut entries = Vec::with_capacity(rows.len());
    for (url, captured_at) in rows {
      let url = Url::parse(&url).map_err(|e| eyre!("Invalid stored URL {}: {}", url, e))?;
      entries.push(CacheEntryMeta {
        identity: RequestIdentity::get(url),
        captured_at: parse_datetime(&captured_at)?,
      });
    }

    Ok(entries)
  }
}

/// In-memory cache store, used for the ephemeral mode and in tests.
#[derive(Default)]
pub struct MemoryStore {
  generations: Mutex<BTreeMap<String, BTreeMap<String, (RequestIdentity, StoredResponse)>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryStore {
  fn create_generation(&self, generation: &str) -> Result<()> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    generations.entry(generation.to_string()).or_default();
    Ok(())
  }

  fn delete_generation(&self, generation: &str) -> Result<()> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    generations.remove(generation);
    Ok(())
  }

  fn list_generations(&self) -> Result<Vec<String>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(generations.keys().cloned().collect())
  }

  fn put(
    &self,
    generation: &str,
    identity: &RequestIdentity,
    response: &StoredResponse,
  ) -> Result<()> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    generations
      .entry(generation.to_string())
      .or_default()
      .insert(
        identity.storage_key(),
        (identity.clone(), response.clone()),
      );
    Ok(())
  }

  fn get(
    &self,
    generation: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<StoredResponse>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      generations
        .get(generation)
        .and_then(|entries| entries.get(&identity.storage_key()))
        .map(|(_, response)| response.clone()),
    )
  }

  fn remove(&self, generation: &str, identity: &RequestIdentity) -> Result<()> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if let Some(entries) = generations.get_mut(generation) {
      entries.remove(&identity.storage_key());
    }
    Ok(())
  }

  fn list_entries(&self, generation: &str) -> Result<Vec<CacheEntryMeta>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      generations
        .get(generation)
        .map(|entries| {
          entries
            .values()
            .map(|(identity, response)| CacheEntryMeta {
              identity: identity.clone(),
              captured_at: response.captured_at,
            })
            .collect()
        })
        .unwrap_or_default(),
    )
  }
}

/// Parse an RFC 3339 timestamp stored by `put`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
