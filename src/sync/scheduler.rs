//! Drains queued mutations against the remote API.

use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use url::Url;

use crate::db::blocking;
use crate::net::{Network, Request};
use crate::queue::{EntityType, PendingMutation, QueueStore};

/// Signal to drain the queue of one entity type now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
  Referrals,
  Questions,
}

impl SyncTrigger {
  pub const ALL: [SyncTrigger; 2] = [SyncTrigger::Referrals, SyncTrigger::Questions];

  pub fn tag(&self) -> &'static str {
    match self {
      Self::Referrals => "background-referral-sync",
      Self::Questions => "background-question-sync",
    }
  }

  pub fn entity_type(&self) -> EntityType {
    match self {
      Self::Referrals => EntityType::Referral,
      Self::Questions => EntityType::Question,
    }
  }
}

impl fmt::Display for SyncTrigger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.tag())
  }
}

impl FromStr for SyncTrigger {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|t| t.tag() == s)
      .ok_or_else(|| eyre!("Unknown sync tag '{}'", s))
  }
}

/// Per-run counts, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub attempted: usize,
  pub synced: usize,
  pub failed: usize,
}

/// Replays queued mutations, one at a time, against the remote endpoints.
pub struct SyncScheduler<N: Network> {
  queue: Arc<QueueStore>,
  network: Arc<N>,
  api_base: Url,
  /// Runs for the same entity type never overlap
  referral_run: Mutex<()>,
  question_run: Mutex<()>,
}

impl<N: Network> SyncScheduler<N> {
  pub fn new(queue: Arc<QueueStore>, network: Arc<N>, mut api_base: Url) -> Self {
    // Endpoints resolve below the base path, not beside it.
    if !api_base.path().ends_with('/') {
      let path = format!("{}/", api_base.path());
      api_base.set_path(&path);
    }

    Self {
      queue,
      network,
      api_base,
      referral_run: Mutex::new(()),
      question_run: Mutex::new(()),
    }
  }

  /// Drain the queue for `trigger` to completion.
  ///
  /// A mutation is removed only after a 2xx answer. Rejections and
  /// transport errors leave it queued for the next trigger and never stop
  /// the rest of the batch.
  pub async fn run(&self, trigger: SyncTrigger) -> SyncReport {
    let entity_type = trigger.entity_type();
    let _run = match entity_type {
      EntityType::Referral => self.referral_run.lock().await,
      EntityType::Question => self.question_run.lock().await,
    };

    info!(tag = %trigger, "Background sync triggered");
    let mut report = SyncReport::default();

    let queue = Arc::clone(&self.queue);
    let pending = match blocking(move || queue.list_all(entity_type)).await {
      Ok(pending) => pending,
      Err(e) => {
        error!(%entity_type, "Failed to read offline queue: {}", e);
        return report;
      }
    };

    for mutation in pending {
      report.attempted += 1;

      if let Err(e) = self.submit(&mutation).await {
        warn!(%entity_type, id = %mutation.id, "Failed to sync: {}", e);
        report.failed += 1;
        continue;
      }

      let queue = Arc::clone(&self.queue);
      let id = mutation.id.clone();
      match blocking(move || queue.remove(entity_type, &id)).await {
        Ok(()) => {
          info!(%entity_type, id = %mutation.id, "Synced successfully");
          report.synced += 1;
        }
        Err(e) => {
          // Accepted remotely but still queued: it will be posted again.
          error!(%entity_type, id = %mutation.id, "Failed to remove synced mutation: {}", e);
          report.failed += 1;
        }
      }
    }

    let queue = Arc::clone(&self.queue);
    let remaining = match blocking(move || queue.count(entity_type)).await {
      Ok(n) => n,
      Err(e) => {
        warn!(%entity_type, "Failed to count offline queue: {}", e);
        report.failed
      }
    };

    info!(
      tag = %trigger,
      attempted = report.attempted,
      synced = report.synced,
      failed = report.failed,
      remaining,
      "Background sync finished"
    );
    report
  }

  /// POST one mutation's payload to its endpoint.
  pub async fn submit(&self, mutation: &PendingMutation) -> Result<()> {
    let endpoint = self
      .api_base
      .join(mutation.entity_type.endpoint())
      .map_err(|e| eyre!("Invalid endpoint for {}: {}", mutation.entity_type, e))?;

    let request = Request::post_json(endpoint, &mutation.payload)?;
    let response = self.network.fetch(request).await?;

    if response.is_success() {
      Ok(())
    } else {
      Err(eyre!(
        "Endpoint rejected {} {} with status {}",
        mutation.entity_type,
        mutation.id,
        response.status
      ))
    }
  }
}
