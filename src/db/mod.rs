//! SQLite connection wrapper shared by the cache and queue stores.

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// One additive schema step.
///
/// Migrations are applied in order, each exactly once, tracked through
/// `PRAGMA user_version`. A step may only add tables, indexes or rows.
pub struct Migration {
  pub version: u32,
  pub sql: &'static str,
}

/// Database connection wrapper
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path` and bring its schema up to date.
  pub fn open(path: &Path, migrations: &[Migration]) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn, migrations)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory(migrations: &[Migration]) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    Self::from_connection(conn, migrations)
  }

  fn from_connection(conn: Connection, migrations: &[Migration]) -> Result<Self> {
    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;
    conn
      .execute_batch("PRAGMA foreign_keys = ON;")
      .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;

    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations(migrations)?;

    Ok(db)
  }

  /// Apply every migration newer than the stored schema version.
  fn run_migrations(&self, migrations: &[Migration]) -> Result<()> {
    let mut conn = self.conn()?;

    let current: u32 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

    for migration in migrations.iter().filter(|m| m.version > current) {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin migration: {}", e))?;

      tx.execute_batch(migration.sql)
        .map_err(|e| eyre!("Failed to run migration {}: {}", migration.version, e))?;
      tx.pragma_update(None, "user_version", migration.version)
        .map_err(|e| eyre!("Failed to record schema version: {}", e))?;

      tx.commit()
        .map_err(|e| eyre!("Failed to commit migration {}: {}", migration.version, e))?;

      debug!(version = migration.version, "Applied schema migration");
    }

    Ok(())
  }

  /// Lock the connection for a unit of work.
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Current schema version.
  pub fn schema_version(&self) -> Result<u32> {
    self
      .conn()?
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))
  }
}

/// Run a store operation on the blocking pool.
///
/// Async handlers never touch SQLite on an executor thread; they go
/// through here instead.
pub async fn blocking<T, F>(op: F) -> Result<T>
where
  T: Send + 'static,
  F: FnOnce() -> Result<T> + Send + 'static,
{
  tokio::task::spawn_blocking(op)
    .await
    .map_err(|e| eyre!("Storage task did not complete: {}", e))?
}
