//! Network-first read policy with cache fallback.

use reqwest::Method;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::{Origin, Url};

use super::store::CacheHandle;
use super::types::{CacheKey, CachedResponse, ResponseSource, Served};
use crate::db::blocking;
use crate::net::{Network, Request, Response};

/// Origins the worker takes part in: its own, plus trusted external hosts.
#[derive(Debug, Clone)]
pub struct Scope {
  origin: Origin,
  root: Url,
  trusted_hosts: Vec<String>,
}

impl Scope {
  pub fn new(origin: &Url, trusted_hosts: &[String]) -> Self {
    let mut root = origin.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);

    Self {
      origin: origin.origin(),
      root,
      trusted_hosts: trusted_hosts
        .iter()
        .map(|h| h.trim_start_matches('.').to_lowercase())
        .collect(),
    }
  }

  /// A trusted host matches itself and any of its subdomains.
  pub fn contains(&self, url: &Url) -> bool {
    if url.origin() == self.origin {
      return true;
    }

    let Some(host) = url.host_str() else {
      return false;
    };
    let host = host.to_lowercase();

    self.trusted_hosts.iter().any(|trusted| {
      host == *trusted
        || host
          .strip_suffix(trusted.as_str())
          .is_some_and(|prefix| prefix.ends_with('.'))
    })
  }

  /// The app shell document.
  pub fn root(&self) -> &Url {
    &self.root
  }
}

/// Outcome of offering a request to the interceptor.
#[derive(Debug)]
pub enum Intercepted {
  /// Out of scope; the caller performs the request itself.
  PassThrough(Request),
  Served(Served),
}

/// Decides per request whether to answer from the network, from the cache,
/// or with a synthesized offline response.
pub struct FetchInterceptor<N: Network> {
  network: Arc<N>,
  cache: CacheHandle,
  scope: Scope,
  pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl<N: Network> FetchInterceptor<N> {
  pub fn new(network: Arc<N>, cache: CacheHandle, scope: Scope) -> Self {
    Self {
      network,
      cache,
      scope,
      pending_writes: Mutex::new(Vec::new()),
    }
  }

  /// Handle one read request.
  ///
  /// 1. Out of scope and non-GET requests are handed back untouched
  /// 2. Try the network; cacheable responses are stored in the background
  /// 3. On network failure, answer from the cache
  /// 4. Navigation misses fall back to the cached root document, then to a 503
  pub async fn handle(&self, request: Request) -> Intercepted {
    if request.method != Method::GET || !self.scope.contains(&request.url) {
      return Intercepted::PassThrough(request);
    }

    let key = CacheKey::for_request(&request);

    match self.network.fetch(request.clone()).await {
      Ok(response) => {
        if response.is_cacheable() {
          self.store_in_background(key, response.clone());
        }
        Intercepted::Served(Served::from_network(response))
      }
      Err(e) => {
        debug!(url = %request.url, "Network failed, trying cache: {}", e);
        Intercepted::Served(self.fallback(&request, &key).await)
      }
    }
  }

  async fn fallback(&self, request: &Request, key: &CacheKey) -> Served {
    if let Some(cached) = self.lookup(key).await {
      return Served::from_cache(cached, ResponseSource::Cache);
    }

    if request.is_navigation() {
      if let Some(shell) = self.lookup(&CacheKey::for_url(self.scope.root())).await {
        return Served::from_cache(shell, ResponseSource::Shell);
      }
      return Served::offline(Response::service_unavailable(
        "App is offline",
        Some("text/plain"),
      ));
    }

    Served::offline(Response::service_unavailable("Offline", None))
  }

  /// Cache read errors count as a miss.
  async fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
    let cache = self.cache.clone();
    let owned = key.clone();

    match blocking(move || cache.get(&owned)).await {
      Ok(cached) => cached,
      Err(e) => {
        warn!(url = %key.url(), "Cache lookup failed: {}", e);
        None
      }
    }
  }

  /// Write the response to the cache without holding up the caller.
  fn store_in_background(&self, key: CacheKey, response: Response) {
    let cache = self.cache.clone();

    let handle = tokio::task::spawn_blocking(move || {
      if let Err(e) = cache.put(&key, &response) {
        warn!(
          url = %key.url(),
          generation = %cache.generation(),
          "Failed to cache response: {}",
          e
        );
      }
    });

    if let Ok(mut pending) = self.pending_writes.lock() {
      pending.retain(|h| !h.is_finished());
      pending.push(handle);
    }
  }

  /// Wait for every background cache write launched so far.
  pub async fn settle(&self) {
    let handles = match self.pending_writes.lock() {
      Ok(mut pending) => std::mem::take(&mut *pending),
      Err(_) => return,
    };

    for handle in handles {
      if let Err(e) = handle.await {
        warn!("Background cache write did not complete: {}", e);
      }
    }
  }
}
