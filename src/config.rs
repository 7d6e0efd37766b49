use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the worker serves, e.g. "https://portal.example.com"
  pub origin: String,
  /// Default notification title
  pub title: String,
  /// Where the cache and queue databases live (defaults to the XDG data dir)
  pub data_dir: Option<PathBuf>,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// When false, reads go network-only with the offline 503 fallback
  pub enabled: bool,
  /// Name of the current cache generation; bump on every deployment
  pub generation: String,
  /// Resources prefetched at install, relative to `origin` or absolute
  pub manifest: Vec<String>,
  /// External hosts (and their subdomains) the worker also caches for
  pub trusted_hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Base URL of the write endpoints (defaults to `origin`); endpoint
  /// paths resolve below its path
  pub api_base: Option<String>,
  /// Seconds between connectivity probes in `run` mode
  pub probe_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      title: "Affiliate Portal".to_string(),
      data_dir: None,
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
      network: NetworkConfig::default(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      generation: "affiliate-v1".to_string(),
      manifest: vec![
        "/".to_string(),
        "/manifest.json".to_string(),
        "https://fonts.googleapis.com/css2?family=Inter:wght@400;600;800&display=swap".to_string(),
        "https://cdn.jsdelivr.net/npm/@supabase/supabase-js@2".to_string(),
      ],
      trusted_hosts: vec![
        "supabase.co".to_string(),
        "googleapis.com".to_string(),
        "jsdelivr.net".to_string(),
      ],
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      api_base: None,
      probe_interval_secs: 30,
    }
  }
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 15 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
  ///
  /// Built-in defaults apply when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Check every derived URL once so later lookups cannot fail.
  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;
    self.manifest_urls()?;
    self.api_base()?;
    if self.cache.generation.trim().is_empty() {
      return Err(eyre!("cache.generation must not be empty"));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    match url.scheme() {
      "http" | "https" => Ok(url),
      other => Err(eyre!("Origin must be http or https, got '{}'", other)),
    }
  }

  /// Manifest entries resolved against the origin.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin_url()?;

    self
      .cache
      .manifest
      .iter()
      .map(|entry| {
        origin
          .join(entry)
          .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))
      })
      .collect()
  }

  pub fn api_base(&self) -> Result<Url> {
    match &self.sync.api_base {
      Some(base) => Url::parse(base).map_err(|e| eyre!("Invalid sync.api_base '{}': {}", base, e)),
      None => self.origin_url(),
    }
  }

  /// Tag shared by every notification, derived from the generation name.
  pub fn notification_tag(&self) -> String {
    let app = self
      .cache
      .generation
      .rsplit_once("-v")
      .map(|(app, _)| app)
      .unwrap_or(&self.cache.generation);
    format!("{}-notification", app)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.sync.probe_interval_secs.max(1))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.network.timeout_secs)
  }

  /// Get the data directory.
  ///
  /// Checks OFFLINE_WORKER_DATA_DIR first, then the config file, then the
  /// platform data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("OFFLINE_WORKER_DATA_DIR") {
      return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-worker"))
  }

  pub fn cache_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("cache.db"))
  }

  pub fn queue_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("queue.db"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let config = Config::default();
    config.validate().unwrap();
    assert_eq!(config.manifest_urls().unwrap()[0].as_str(), "http://localhost:3000/");
    assert_eq!(config.notification_tag(), "affiliate-notification");
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
origin: "https://portal.example.com"
cache:
  generation: "portal-v7"
  manifest: ["/", "/manifest.json"]
sync:
  api_base: "https://api.example.com"
"#,
    )
    .unwrap();

    config.validate().unwrap();
    assert!(config.cache.enabled);
    assert_eq!(config.cache.trusted_hosts.len(), 3);
    assert_eq!(
      config.manifest_urls().unwrap()[1].as_str(),
      "https://portal.example.com/manifest.json"
    );
    assert_eq!(config.api_base().unwrap().as_str(), "https://api.example.com/");
    assert_eq!(config.notification_tag(), "portal-notification");
    assert_eq!(config.network.timeout_secs, 15);
  }

  #[test]
  fn test_rejects_non_http_origin() {
    let config = Config::from_yaml("origin: \"file:///tmp/app\"").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_explicit_missing_file_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/offline-worker.yaml"))).is_err());
  }
}
