//! The worker's event surface.
//!
//! Each handler runs one event to completion and never fails: transient
//! network and storage problems are logged and degrade to the documented
//! fallback instead.

use color_eyre::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{
  CacheStore, FetchInterceptor, GenerationState, InstallReport, Intercepted, LifecycleManager,
  NoopStorage, Scope, Served, SqliteStorage,
};
use crate::config::Config;
use crate::db::blocking;
use crate::net::{HttpNetwork, Network, Request, Response};
use crate::notify::{self, ClickAction, Notification};
use crate::queue::{EntityType, PendingMutation, QueueStore};
use crate::sync::{SyncReport, SyncScheduler, SyncTrigger};

/// The two persistent stores the worker owns.
pub struct Stores {
  pub cache: CacheStore,
  pub queue: Arc<QueueStore>,
}

impl Stores {
  /// Open both stores under the configured data directory.
  pub fn open(config: &Config) -> Result<Self> {
    let cache = if config.cache.enabled {
      CacheStore::new(SqliteStorage::open(&config.cache_db_path()?)?)
    } else {
      CacheStore::new(NoopStorage)
    };

    Ok(Self {
      cache,
      queue: Arc::new(QueueStore::open(&config.queue_db_path()?)?),
    })
  }

  pub fn in_memory() -> Result<Self> {
    Ok(Self {
      cache: CacheStore::new(SqliteStorage::open_in_memory()?),
      queue: Arc::new(QueueStore::open_in_memory()?),
    })
  }
}

/// Control messages sent by the app to the worker. No reply is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate an installed worker without waiting
  SkipWaiting,
}

impl ControlMessage {
  /// Unknown or malformed messages are ignored.
  pub fn parse(data: &str) -> Option<Self> {
    serde_json::from_str(data).ok()
  }
}

/// Where a client write ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
  Delivered,
  Queued,
}

pub struct Worker<N: Network> {
  origin: Url,
  title: String,
  notification_tag: String,
  network: Arc<N>,
  queue: Arc<QueueStore>,
  lifecycle: LifecycleManager<N>,
  interceptor: FetchInterceptor<N>,
  scheduler: SyncScheduler<N>,
}

impl Worker<HttpNetwork> {
  /// Build a worker talking to the real network with file-backed stores.
  pub fn from_config(config: &Config) -> Result<Self> {
    let network = HttpNetwork::new(&config.origin_url()?, config.timeout())?;
    Self::new(config, network, Stores::open(config)?)
  }
}

impl<N: Network> Worker<N> {
  pub fn new(config: &Config, network: N, stores: Stores) -> Result<Self> {
    let origin = config.origin_url()?;
    let network = Arc::new(network);
    let generation = config.cache.generation.clone();

    let interceptor = FetchInterceptor::new(
      Arc::clone(&network),
      stores.cache.open(&generation)?,
      Scope::new(&origin, &config.cache.trusted_hosts),
    );
    let lifecycle = LifecycleManager::new(
      Arc::clone(&network),
      stores.cache,
      generation,
      config.manifest_urls()?,
    );
    let scheduler = SyncScheduler::new(
      Arc::clone(&stores.queue),
      Arc::clone(&network),
      config.api_base()?,
    );

    Ok(Self {
      origin,
      title: config.title.clone(),
      notification_tag: config.notification_tag(),
      network,
      queue: stores.queue,
      lifecycle,
      interceptor,
      scheduler,
    })
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn network(&self) -> Arc<N> {
    Arc::clone(&self.network)
  }

  /// Queued writes of one type, oldest first.
  pub async fn pending(&self, entity_type: EntityType) -> Result<Vec<PendingMutation>> {
    let queue = Arc::clone(&self.queue);
    blocking(move || queue.list_all(entity_type)).await
  }

  pub async fn handle_install(&self) -> InstallReport {
    match self.lifecycle.install().await {
      Ok(report) => report,
      Err(e) => {
        error!("Cache failed to open: {}", e);
        InstallReport::default()
      }
    }
  }

  pub async fn handle_activate(&self) -> Vec<String> {
    match self.lifecycle.activate().await {
      Ok(purged) => purged,
      Err(e) => {
        error!("Activation failed: {}", e);
        Vec::new()
      }
    }
  }

  /// Whether the current generation is active and serving.
  pub async fn is_active(&self) -> bool {
    match self.lifecycle.state().await {
      Ok(state) => state == Some(GenerationState::Active),
      Err(e) => {
        warn!("Failed to read worker state: {}", e);
        false
      }
    }
  }

  /// Answer a read. Until activation, and for requests outside the
  /// worker's scope, the request goes straight to the network.
  pub async fn handle_fetch(&self, request: Request) -> Served {
    let request = if self.is_active().await {
      match self.interceptor.handle(request).await {
        Intercepted::Served(served) => return served,
        Intercepted::PassThrough(request) => request,
      }
    } else {
      request
    };

    match self.network.fetch(request).await {
      Ok(response) => Served::pass_through(response),
      Err(e) => {
        debug!("Pass-through request failed: {}", e);
        Served::pass_through(Response::service_unavailable("Offline", None))
      }
    }
  }

  /// Run a sync trigger by tag. Unknown tags are ignored.
  pub async fn handle_sync_tag(&self, tag: &str) -> Option<SyncReport> {
    match tag.parse::<SyncTrigger>() {
      Ok(trigger) => Some(self.handle_sync(trigger).await),
      Err(e) => {
        debug!("Ignoring sync event: {}", e);
        None
      }
    }
  }

  pub async fn handle_sync(&self, trigger: SyncTrigger) -> SyncReport {
    self.scheduler.run(trigger).await
  }

  pub fn handle_push(&self, data: Option<&[u8]>) -> Notification {
    info!("Push notification received");
    Notification::from_push(&self.title, &self.notification_tag, data)
  }

  pub fn handle_notification_click(&self, action: Option<&str>, open_clients: &[Url]) -> ClickAction {
    info!(tag = %self.notification_tag, "Notification clicked");
    notify::resolve_click(action, open_clients, &self.origin)
  }

  pub async fn handle_message(&self, message: ControlMessage) {
    match message {
      ControlMessage::SkipWaiting => match self.lifecycle.state().await {
        Ok(Some(GenerationState::Installed)) => {
          self.handle_activate().await;
        }
        Ok(_) => debug!("Skip waiting: nothing is waiting"),
        Err(e) => warn!("Failed to read worker state: {}", e),
      },
    }
  }

  /// Queue a client write for the next sync.
  pub async fn enqueue(
    &self,
    entity_type: EntityType,
    id: &str,
    payload: serde_json::Value,
  ) -> Result<PendingMutation> {
    let mutation = PendingMutation::new(id, entity_type, payload);
    self.store_pending(mutation.clone()).await?;
    info!(%entity_type, id, "Queued for background sync");
    Ok(mutation)
  }

  /// Send a client write now, queueing it if the endpoint cannot take it.
  pub async fn submit(
    &self,
    entity_type: EntityType,
    id: &str,
    payload: serde_json::Value,
  ) -> Result<SubmitOutcome> {
    let mutation = PendingMutation::new(id, entity_type, payload);

    match self.scheduler.submit(&mutation).await {
      Ok(()) => Ok(SubmitOutcome::Delivered),
      Err(e) => {
        info!(%entity_type, id, "Submit failed, queueing: {}", e);
        self.store_pending(mutation).await?;
        Ok(SubmitOutcome::Queued)
      }
    }
  }

  async fn store_pending(&self, mutation: PendingMutation) -> Result<()> {
    let queue = Arc::clone(&self.queue);
    blocking(move || queue.enqueue(&mutation)).await
  }

  /// Wait for outstanding background work before the process exits.
  pub async fn shutdown(&self) {
    self.interceptor.settle().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ResponseSource;
  use crate::net::fake::FakeNetwork;
  use crate::net::ResponseKind;
  use serde_json::json;

  fn config() -> Config {
    Config::from_yaml(
      r#"
origin: "https://portal.test"
cache:
  generation: "portal-v1"
  manifest: ["/", "/manifest.json"]
"#,
    )
    .unwrap()
  }

  fn online() -> FakeNetwork {
    FakeNetwork::new(|request| match request.url.path() {
      "/" => Ok(Response::new(200, ResponseKind::Basic, "<html>shell</html>")),
      "/api/referrals" | "/api/questions" => Ok(Response::new(201, ResponseKind::Basic, "")),
      _ => Ok(Response::new(200, ResponseKind::Basic, "{}")),
    })
  }

  #[tokio::test]
  async fn test_fetch_passes_through_until_activated() {
    let worker = Worker::new(&config(), online(), Stores::in_memory().unwrap()).unwrap();
    let url = worker.origin().join("/dashboard").unwrap();

    let before = worker.handle_fetch(Request::navigate(url.clone())).await;
    assert_eq!(before.source, ResponseSource::PassThrough);

    worker.handle_install().await;
    assert!(!worker.is_active().await);
    worker
      .handle_message(ControlMessage::parse(r#"{"type":"SKIP_WAITING"}"#).unwrap())
      .await;
    assert!(worker.is_active().await);

    let after = worker.handle_fetch(Request::navigate(url)).await;
    assert_eq!(after.source, ResponseSource::Network);
  }

  #[tokio::test]
  async fn test_offline_navigation_gets_installed_shell() {
    let worker = Worker::new(&config(), online(), Stores::in_memory().unwrap()).unwrap();
    let report = worker.handle_install().await;
    assert_eq!(report.cached, 2);
    worker.handle_activate().await;

    worker.network().set_offline(true);
    let page = worker
      .handle_fetch(Request::navigate(worker.origin().join("/referrals/9").unwrap()))
      .await;
    assert_eq!(page.source, ResponseSource::Shell);
    assert_eq!(page.response.text(), "<html>shell</html>");

    let outside = worker
      .handle_fetch(Request::get(Url::parse("https://tracker.example/p").unwrap()))
      .await;
    assert_eq!(outside.source, ResponseSource::PassThrough);
    assert_eq!(outside.response.status, 503);
    worker.shutdown().await;
  }

  #[tokio::test]
  async fn test_offline_post_is_not_answered_from_cache() {
    let network = FakeNetwork::new(|_| Ok(Response::new(200, ResponseKind::Basic, r#"{"ok":true}"#)));
    let worker = Worker::new(&config(), network, Stores::in_memory().unwrap()).unwrap();
    worker.handle_activate().await;
    let endpoint = worker.origin().join("/api/referrals").unwrap();

    let first = worker
      .handle_fetch(Request::post_json(endpoint.clone(), &json!({"company": "A"})).unwrap())
      .await;
    assert_eq!(first.source, ResponseSource::PassThrough);
    assert_eq!(first.response.status, 200);
    worker.shutdown().await;

    worker.network().set_offline(true);
    let second = worker
      .handle_fetch(Request::post_json(endpoint, &json!({"company": "B"})).unwrap())
      .await;
    assert_ne!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.status, 503);
  }

  #[tokio::test]
  async fn test_referral_scenario_end_to_end() {
    let worker = Worker::new(&config(), online(), Stores::in_memory().unwrap()).unwrap();
    worker
      .enqueue(EntityType::Referral, "r1", json!({"company": "Acme"}))
      .await
      .unwrap();

    let report = worker.handle_sync_tag("background-referral-sync").await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(worker.pending(EntityType::Referral).await.unwrap().is_empty());

    let posts = worker.network().requests();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].url.path(), "/api/referrals");
    assert_eq!(posts[0].body.as_deref(), Some(br#"{"company":"Acme"}"#.as_slice()));

    worker.handle_sync_tag("background-referral-sync").await.unwrap();
    assert_eq!(worker.network().request_count(), 1);

    assert!(worker.handle_sync_tag("unknown-tag").await.is_none());
  }

  #[tokio::test]
  async fn test_submit_queues_when_offline_and_sync_drains_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.data_dir = Some(dir.path().to_path_buf());

    {
      let worker = Worker::new(&config, FakeNetwork::offline(), Stores::open(&config).unwrap()).unwrap();
      let outcome = worker
        .submit(EntityType::Question, "q1", json!({"text": "When is payout?"}))
        .await
        .unwrap();
      assert_eq!(outcome, SubmitOutcome::Queued);
    }

    let worker = Worker::new(&config, online(), Stores::open(&config).unwrap()).unwrap();
    assert_eq!(worker.pending(EntityType::Question).await.unwrap().len(), 1);

    let report = worker.handle_sync(SyncTrigger::Questions).await;
    assert_eq!(report.synced, 1);
    assert_eq!(worker.pending(EntityType::Question).await.unwrap().len(), 0);

    let outcome = worker
      .submit(EntityType::Question, "q2", json!({"text": "Thanks"}))
      .await
      .unwrap();
    assert_eq!(outcome, SubmitOutcome::Delivered);
    assert_eq!(worker.pending(EntityType::Question).await.unwrap().len(), 0);
  }

  #[test]
  fn test_control_message_parsing() {
    assert_eq!(
      ControlMessage::parse(r#"{"type":"SKIP_WAITING"}"#),
      Some(ControlMessage::SkipWaiting)
    );
    assert_eq!(ControlMessage::parse(r#"{"type":"RELOAD"}"#), None);
    assert_eq!(ControlMessage::parse("garbage"), None);
  }

  #[tokio::test]
  async fn test_push_and_click() {
    let worker = Worker::new(&config(), online(), Stores::in_memory().unwrap()).unwrap();

    let notification = worker.handle_push(Some(br#"{"type":"payment","amount":40}"#.as_slice()));
    assert_eq!(notification.tag, "portal-notification");
    assert_eq!(notification.body, "You received $40 commission payment");

    assert_eq!(
      worker.handle_notification_click(None, &[]),
      ClickAction::OpenWindow(Url::parse("https://portal.test/").unwrap())
    );
  }
}
