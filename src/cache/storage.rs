//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::types::{CacheKey, CachedResponse, GenerationState};
use crate::db::{Database, Migration};
use crate::net::Response;

/// Trait for cache storage backends.
///
/// Every entry lives in exactly one named generation.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create a generation in the `installed` state if it does not exist.
  fn create_generation(&self, generation: &str) -> Result<()>;

  /// Names of all existing generations.
  fn generations(&self) -> Result<Vec<String>>;

  /// State of a generation, `None` if it does not exist.
  fn generation_state(&self, generation: &str) -> Result<Option<GenerationState>>;

  fn set_generation_state(&self, generation: &str, state: GenerationState) -> Result<()>;

  /// Delete a generation and all of its entries. Returns false if absent.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// Store a response, replacing any previous one under the same key.
  fn put(&self, generation: &str, key: &CacheKey, response: &Response) -> Result<()>;

  fn get(&self, generation: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - every generation reports as active,
/// reads always miss and writes are discarded.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn create_generation(&self, _generation: &str) -> Result<()> {
    Ok(())
  }

  fn generations(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn generation_state(&self, _generation: &str) -> Result<Option<GenerationState>> {
    Ok(Some(GenerationState::Active))
  }

  fn set_generation_state(&self, _generation: &str, _state: GenerationState) -> Result<()> {
    Ok(())
  }

  fn delete_generation(&self, _generation: &str) -> Result<bool> {
    Ok(false)
  }

  fn put(&self, _generation: &str, _key: &CacheKey, _response: &Response) -> Result<()> {
    Ok(()) // Discard
  }

  fn get(&self, _generation: &str, _key: &CacheKey) -> Result<Option<CachedResponse>> {
    Ok(None) // Always miss
  }
}

/// Schema for cache tables.
const CACHE_MIGRATIONS: &[Migration] = &[Migration {
  version: 1,
  sql: r#"
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT 'installed',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per cached response
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    kind TEXT NOT NULL,
    redirected INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, cache_key),
    FOREIGN KEY (generation) REFERENCES cache_generations(name) ON DELETE CASCADE
);
"#,
}];

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    Ok(Self {
      db: Database::open(path, CACHE_MIGRATIONS)?,
    })
  }

  pub fn open_in_memory() -> Result<Self> {
    Ok(Self {
      db: Database::open_in_memory(CACHE_MIGRATIONS)?,
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn create_generation(&self, generation: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name, state) VALUES (?, ?)",
        params![generation, GenerationState::Installed.as_str()],
      )
      .map_err(|e| eyre!("Failed to create cache generation {}: {}", generation, e))?;

    Ok(())
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache generation: {}", e))?;

    Ok(names)
  }

  fn generation_state(&self, generation: &str) -> Result<Option<GenerationState>> {
    let state: Option<String> = self
      .db
      .conn()?
      .query_row(
        "SELECT state FROM cache_generations WHERE name = ?",
        params![generation],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache generation {}: {}", generation, e))?;

    match state {
      Some(s) => GenerationState::parse(&s)
        .map(Some)
        .ok_or_else(|| eyre!("Unknown state '{}' for cache generation {}", s, generation)),
      None => Ok(None),
    }
  }

  fn set_generation_state(&self, generation: &str, state: GenerationState) -> Result<()> {
    let updated = self
      .db
      .conn()?
      .execute(
        "UPDATE cache_generations SET state = ? WHERE name = ?",
        params![state.as_str(), generation],
      )
      .map_err(|e| eyre!("Failed to update cache generation {}: {}", generation, e))?;

    if updated == 0 {
      return Err(eyre!("Cache generation {} does not exist", generation));
    }

    Ok(())
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;

    let deleted = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete cache generation {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn put(&self, generation: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (generation, cache_key, url, status, status_text, headers, body, kind, redirected, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          generation,
          key.hash(),
          key.url(),
          response.status,
          response.status_text,
          headers,
          response.body,
          response.kind.as_str(),
          response.redirected,
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key.url(), generation, e))?;

    Ok(())
  }

  fn get(&self, generation: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, status_text, headers, body, kind, redirected, cached_at
         FROM cache_entries WHERE generation = ? AND cache_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    #[allow(clippy::type_complexity)]
    let row: Option<(u16, String, String, Vec<u8>, String, bool, String)> = stmt
      .query_row(params![generation, key.hash()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.url(), e))?;

    let Some((status, status_text, headers, body, kind, redirected, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key.url(), e))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        status_text,
        headers,
        body,
        kind: kind.parse()?,
        redirected,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
