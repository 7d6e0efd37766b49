//! SQLite-backed queue store.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::path::Path;
use tracing::{debug, warn};

use super::{EntityType, PendingMutation};
use crate::db::{Database, Migration};

/// Schema for queue tables. Additive only: existing namespaces and rows are
/// never rewritten by a later version.
const QUEUE_MIGRATIONS: &[Migration] = &[Migration {
  version: 1,
  sql: r#"
CREATE TABLE IF NOT EXISTS queue_namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS pending_mutations (
    namespace TEXT NOT NULL,
    id TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (namespace, id),
    FOREIGN KEY (namespace) REFERENCES queue_namespaces(name)
);

CREATE INDEX IF NOT EXISTS idx_pending_mutations_created
    ON pending_mutations(namespace, created_at);
"#,
}];

/// Durable, per-entity-type keyed store of pending mutations.
pub struct QueueStore {
  db: Database,
}

impl QueueStore {
  /// Open or create the queue database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let store = Self {
      db: Database::open(path, QUEUE_MIGRATIONS)?,
    };
    store.register_namespaces()?;
    debug!(
      path = %path.display(),
      schema = store.db.schema_version()?,
      "Queue store ready"
    );
    Ok(store)
  }

  pub fn open_in_memory() -> Result<Self> {
    let store = Self {
      db: Database::open_in_memory(QUEUE_MIGRATIONS)?,
    };
    store.register_namespaces()?;
    Ok(store)
  }

  /// Create the namespace of every known entity type if absent.
  fn register_namespaces(&self) -> Result<()> {
    let conn = self.db.conn()?;

    for entity_type in EntityType::ALL {
      conn
        .execute(
          "INSERT OR IGNORE INTO queue_namespaces (name) VALUES (?)",
          params![entity_type.namespace()],
        )
        .map_err(|e| eyre!("Failed to register queue {}: {}", entity_type.namespace(), e))?;
    }

    Ok(())
  }

  /// Insert a mutation, replacing any queued one with the same id.
  pub fn enqueue(&self, mutation: &PendingMutation) -> Result<()> {
    let payload = serde_json::to_string(&mutation.payload)
      .map_err(|e| eyre!("Failed to serialize mutation {}: {}", mutation.id, e))?;

    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO pending_mutations (namespace, id, payload, created_at)
         VALUES (?, ?, ?, ?)",
        params![
          mutation.entity_type.namespace(),
          mutation.id,
          payload,
          mutation
            .created_at
            .to_rfc3339_opts(SecondsFormat::Nanos, true),
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue {} {}: {}", mutation.entity_type, mutation.id, e))?;

    Ok(())
  }

  /// All queued mutations of one type, oldest first.
  ///
  /// A row that no longer decodes is skipped with a warning rather than
  /// blocking the rest of the queue.
  pub fn list_all(&self, entity_type: EntityType) -> Result<Vec<PendingMutation>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, payload, created_at FROM pending_mutations
         WHERE namespace = ?
         ORDER BY created_at, id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, String)> = stmt
      .query_map(params![entity_type.namespace()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to query {}: {}", entity_type.namespace(), e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read {}: {}", entity_type.namespace(), e))?;

    let mutations = rows
      .into_iter()
      .filter_map(|(id, payload, created_at)| {
        match decode(entity_type, &id, &payload, &created_at) {
          Ok(mutation) => Some(mutation),
          Err(e) => {
            warn!(%entity_type, %id, "Skipping unreadable queued mutation: {}", e);
            None
          }
        }
      })
      .collect();

    Ok(mutations)
  }

  /// Delete a mutation. Removing an absent id is not an error.
  pub fn remove(&self, entity_type: EntityType, id: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "DELETE FROM pending_mutations WHERE namespace = ? AND id = ?",
        params![entity_type.namespace(), id],
      )
      .map_err(|e| eyre!("Failed to remove {} {}: {}", entity_type, id, e))?;

    Ok(())
  }

  pub fn count(&self, entity_type: EntityType) -> Result<usize> {
    self
      .db
      .conn()?
      .query_row(
        "SELECT COUNT(*) FROM pending_mutations WHERE namespace = ?",
        params![entity_type.namespace()],
        |row| row.get::<_, i64>(0),
      )
      .map(|n| n as usize)
      .map_err(|e| eyre!("Failed to count {}: {}", entity_type.namespace(), e))
  }
}

fn decode(
  entity_type: EntityType,
  id: &str,
  payload: &str,
  created_at: &str,
) -> Result<PendingMutation> {
  let payload =
    serde_json::from_str(payload).map_err(|e| eyre!("Failed to deserialize payload: {}", e))?;
  let created_at = DateTime::parse_from_rfc3339(created_at)
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", created_at, e))?
    .with_timezone(&Utc);

  Ok(PendingMutation {
    id: id.to_string(),
    entity_type,
    payload,
    created_at,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_enqueue_overwrites_by_id() {
    let store = QueueStore::open_in_memory().unwrap();

    store
      .enqueue(&PendingMutation::new("r1", EntityType::Referral, json!({"company": "Acme"})))
      .unwrap();
    store
      .enqueue(&PendingMutation::new("r1", EntityType::Referral, json!({"company": "Acme Corp"})))
      .unwrap();

    let pending = store.list_all(EntityType::Referral).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, json!({"company": "Acme Corp"}));
  }

  #[test]
  fn test_namespaces_are_isolated() {
    let store = QueueStore::open_in_memory().unwrap();

    store
      .enqueue(&PendingMutation::new("1", EntityType::Referral, json!({"company": "Acme"})))
      .unwrap();
    store
      .enqueue(&PendingMutation::new("1", EntityType::Question, json!({"text": "When?"})))
      .unwrap();

    store.remove(EntityType::Question, "1").unwrap();
    assert_eq!(store.count(EntityType::Question).unwrap(), 0);
    assert_eq!(store.count(EntityType::Referral).unwrap(), 1);
  }

  #[test]
  fn test_remove_absent_is_noop() {
    let store = QueueStore::open_in_memory().unwrap();
    store.remove(EntityType::Referral, "missing").unwrap();
    assert!(store.list_all(EntityType::Referral).unwrap().is_empty());
  }

  #[test]
  fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let mutation = PendingMutation::new("q7", EntityType::Question, json!({"text": "Payout date?"}));

    {
      let store = QueueStore::open(&path).unwrap();
      store.enqueue(&mutation).unwrap();
    }

    let store = QueueStore::open(&path).unwrap();
    let pending = store.list_all(EntityType::Question).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, mutation.id);
    assert_eq!(pending[0].payload, mutation.payload);
    assert_eq!(pending[0].created_at, mutation.created_at);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_writers_keep_one_row_per_id() {
    let store = std::sync::Arc::new(QueueStore::open_in_memory().unwrap());

    let mut tasks = Vec::new();
    for writer in 0..8 {
      let store = std::sync::Arc::clone(&store);
      tasks.push(tokio::task::spawn_blocking(move || {
        for n in 0..10 {
          // Every writer races on the shared id, and adds one of its own.
          store
            .enqueue(&PendingMutation::new("shared", EntityType::Referral, json!({"writer": writer, "n": n})))
            .unwrap();
        }
        store
          .enqueue(&PendingMutation::new(format!("own-{}", writer), EntityType::Referral, json!({})))
          .unwrap();
      }));
    }
    for task in tasks {
      task.await.unwrap();
    }

    let pending = store.list_all(EntityType::Referral).unwrap();
    assert_eq!(pending.len(), 9);
    assert_eq!(pending.iter().filter(|m| m.id == "shared").count(), 1);

    let shared = pending.iter().find(|m| m.id == "shared").unwrap();
    assert_eq!(shared.payload["n"], json!(9));
  }
}
