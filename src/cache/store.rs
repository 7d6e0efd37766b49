use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use super::storage::CacheStorage;
use super::types::{CacheKey, CachedResponse, GenerationState};
use crate::net::Response;

/// Named, versioned response cache.
#[derive(Clone)]
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
}

impl CacheStore {
  pub fn new(storage: impl CacheStorage) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Open a generation, creating it if absent.
  pub fn open(&self, generation: &str) -> Result<CacheHandle> {
    self.storage.create_generation(generation)?;

    Ok(CacheHandle {
      generation: generation.to_string(),
      storage: Arc::clone(&self.storage),
    })
  }

  pub fn generations(&self) -> Result<Vec<String>> {
    self.storage.generations()
  }

  pub fn state(&self, generation: &str) -> Result<Option<GenerationState>> {
    self.storage.generation_state(generation)
  }

  /// Delete every generation except `current`. Returns the purged names.
  pub fn purge_except(&self, current: &str) -> Result<Vec<String>> {
    let mut purged = Vec::new();

    for name in self.generations()? {
      if name == current {
        continue;
      }
      info!(generation = %name, "Deleting old cache");
      if self.storage.delete_generation(&name)? {
        purged.push(name);
      }
    }

    Ok(purged)
  }
}

/// Access to a single generation.
#[derive(Clone)]
pub struct CacheHandle {
  generation: String,
  storage: Arc<dyn CacheStorage>,
}

impl CacheHandle {
  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn put(&self, key: &CacheKey, response: &Response) -> Result<()> {
    self.storage.put(&self.generation, key, response)
  }

  pub fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>> {
    self.storage.get(&self.generation, key)
  }

  pub fn set_state(&self, state: GenerationState) -> Result<()> {
    self.storage.set_generation_state(&self.generation, state)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::ResponseKind;
  use url::Url;

  #[test]
  fn test_purge_removes_only_old_generations() {
    let store = CacheStore::new(SqliteStorage::open_in_memory().unwrap());
    let key = CacheKey::for_url(&Url::parse("https://app.test/").unwrap());

    let old = store.open("app-v1").unwrap();
    old
      .put(&key, &Response::new(200, ResponseKind::Basic, "old shell"))
      .unwrap();
    store.open("app-v0").unwrap();
    let current = store.open("app-v2").unwrap();
    current
      .put(&key, &Response::new(200, ResponseKind::Basic, "new shell"))
      .unwrap();

    let mut purged = store.purge_except("app-v2").unwrap();
    purged.sort();
    assert_eq!(purged, vec!["app-v0".to_string(), "app-v1".to_string()]);
    assert_eq!(store.generations().unwrap(), vec!["app-v2".to_string()]);

    assert!(old.get(&key).unwrap().is_none());
    assert_eq!(current.get(&key).unwrap().unwrap().response.text(), "new shell");

    // Nothing left to purge on a second run.
    assert!(store.purge_except("app-v2").unwrap().is_empty());
  }

  #[test]
  fn test_open_is_idempotent() {
    let store = CacheStore::new(SqliteStorage::open_in_memory().unwrap());
    let key = CacheKey::for_url(&Url::parse("https://app.test/manifest.json").unwrap());

    store
      .open("app-v1")
      .unwrap()
      .put(&key, &Response::new(200, ResponseKind::Basic, "{}"))
      .unwrap();
    let reopened = store.open("app-v1").unwrap();

    assert_eq!(reopened.generation(), "app-v1");
    assert!(reopened.get(&key).unwrap().is_some());
  }
}
