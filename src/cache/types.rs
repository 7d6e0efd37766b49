//! Core types for the response cache.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Request, Response};

/// Storage key for a cached response.
///
/// The canonical request identity is hashed to a stable, fixed-length key;
/// the URL is kept beside it for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  hash: String,
  url: String,
}

impl CacheKey {
  pub fn for_request(request: &Request) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(request.identity().as_bytes());

    Self {
      hash: hex::encode(hasher.finalize()),
      url: url.to_string(),
    }
  }

  /// Key of a plain GET for `url`.
  pub fn for_url(url: &Url) -> Self {
    Self::for_request(&Request::get(url.clone()))
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }

  pub fn url(&self) -> &str {
    &self.url
  }
}

/// A cached response and when it was stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Lifecycle state of a cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  /// Populated by install, not serving yet
  Installed,
  /// Current and serving requests
  Active,
}

impl GenerationState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Installed => "installed",
      Self::Active => "active",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "installed" => Some(Self::Installed),
      "active" => Some(Self::Active),
      _ => None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Network unavailable, exact cache hit
  Cache,
  /// Network unavailable, navigation answered with the cached root document
  Shell,
  /// Neither network nor cache could answer; synthesized 503
  Offline,
  /// The worker did not take part in the request
  PassThrough,
}

/// Result of handling a read, including where the response came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(cached: CachedResponse, source: ResponseSource) -> Self {
    Self {
      response: cached.response,
      source,
      cached_at: Some(cached.cached_at),
    }
  }

  pub fn offline(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
      cached_at: None,
    }
  }

  pub fn pass_through(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::PassThrough,
      cached_at: None,
    }
  }
}
