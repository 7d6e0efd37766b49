//! Cache generation lifecycle across deployments.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::store::CacheStore;
use super::types::{CacheKey, GenerationState};
use crate::db::blocking;
use crate::net::{Network, Request};

/// Outcome of an install run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: usize,
  /// Manifest URLs that could not be prefetched
  pub failed: Vec<Url>,
}

/// Owns the current cache generation: prefetches the manifest on install
/// and purges every other generation on activation.
pub struct LifecycleManager<N: Network> {
  network: Arc<N>,
  store: CacheStore,
  generation: String,
  manifest: Vec<Url>,
}

impl<N: Network> LifecycleManager<N> {
  pub fn new(network: Arc<N>, store: CacheStore, generation: String, manifest: Vec<Url>) -> Self {
    Self {
      network,
      store,
      generation,
      manifest,
    }
  }

  /// Prefetch the manifest into the current generation.
  ///
  /// A resource that fails to download is logged and skipped; only failing
  /// to open the generation itself is an error.
  pub async fn install(&self) -> Result<InstallReport> {
    info!(generation = %self.generation, "Installing");
    let store = self.store.clone();
    let generation = self.generation.clone();
    let cache = blocking(move || store.open(&generation)).await?;
    let mut report = InstallReport::default();

    for url in &self.manifest {
      let request = Request::get(url.clone());
      let key = CacheKey::for_request(&request);

      let response = match self.network.fetch(request).await {
        Ok(response) if response.is_success() => response,
        Ok(response) => {
          warn!(%url, status = response.status, "Failed to prefetch resource");
          report.failed.push(url.clone());
          continue;
        }
        Err(e) => {
          warn!(%url, "Failed to prefetch resource: {}", e);
          report.failed.push(url.clone());
          continue;
        }
      };

      let handle = cache.clone();
      match blocking(move || handle.put(&key, &response)).await {
        Ok(()) => report.cached += 1,
        Err(e) => {
          warn!(%url, "Failed to cache prefetched resource: {}", e);
          report.failed.push(url.clone());
        }
      }
    }

    info!(
      cached = report.cached,
      failed = report.failed.len(),
      "Cache populated"
    );
    Ok(report)
  }

  /// Purge every other generation, then start serving from the current one.
  pub async fn activate(&self) -> Result<Vec<String>> {
    info!(generation = %self.generation, "Activating");
    let store = self.store.clone();
    let generation = self.generation.clone();

    blocking(move || {
      let purged = store.purge_except(&generation)?;
      store.open(&generation)?.set_state(GenerationState::Active)?;
      Ok(purged)
    })
    .await
  }

  pub async fn state(&self) -> Result<Option<GenerationState>> {
    let store = self.store.clone();
    let generation = self.generation.clone();
    blocking(move || store.state(&generation)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::fake::FakeNetwork;
  use crate::net::{Response, ResponseKind};
  use color_eyre::eyre::eyre;

  fn manifest() -> Vec<Url> {
    [
      "https://portal.test/",
      "https://portal.test/manifest.json",
      "https://fonts.googleapis.com/css2?family=Inter",
      "https://cdn.jsdelivr.net/npm/@supabase/supabase-js@2",
    ]
    .iter()
    .map(|u| Url::parse(u).unwrap())
    .collect()
  }

  #[tokio::test]
  async fn test_install_is_fail_soft() {
    let network = Arc::new(FakeNetwork::new(|request| match request.url.host_str() {
      Some("cdn.jsdelivr.net") => Err(eyre!("connection reset")),
      Some("fonts.googleapis.com") => Ok(Response::new(500, ResponseKind::Cors, "")),
      _ => Ok(Response::new(200, ResponseKind::Basic, "ok")),
    }));
    let store = CacheStore::new(SqliteStorage::open_in_memory().unwrap());
    let lifecycle = LifecycleManager::new(network, store.clone(), "portal-v1".into(), manifest());

    let report = lifecycle.install().await.unwrap();
    assert_eq!(report.cached, 2);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(lifecycle.state().await.unwrap(), Some(GenerationState::Installed));

    let cache = store.open("portal-v1").unwrap();
    let shell = CacheKey::for_url(&manifest()[0]);
    assert!(cache.get(&shell).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_activate_purges_previous_generation() {
    let network = Arc::new(FakeNetwork::new(|_| {
      Ok(Response::new(200, ResponseKind::Basic, "ok"))
    }));
    let store = CacheStore::new(SqliteStorage::open_in_memory().unwrap());

    let v1 = LifecycleManager::new(Arc::clone(&network), store.clone(), "portal-v1".into(), manifest());
    v1.install().await.unwrap();
    v1.activate().await.unwrap();

    let v2 = LifecycleManager::new(network, store.clone(), "portal-v2".into(), manifest());
    v2.install().await.unwrap();
    assert_eq!(v2.state().await.unwrap(), Some(GenerationState::Installed));

    let purged = v2.activate().await.unwrap();
    assert_eq!(purged, vec!["portal-v1".to_string()]);
    assert_eq!(store.generations().unwrap(), vec!["portal-v2".to_string()]);
    assert_eq!(v2.state().await.unwrap(), Some(GenerationState::Active));

    let shell = CacheKey::for_url(&manifest()[0]);
    assert!(store.open("portal-v2").unwrap().get(&shell).unwrap().is_some());
  }
}
