//! Connectivity probing that produces sync triggers.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use url::Url;

use super::scheduler::SyncTrigger;
use crate::event::Event;
use crate::net::{Network, Request};

/// Tracks online/offline transitions.
#[derive(Debug, Default)]
pub struct ConnectivityState {
  online: bool,
}

impl ConnectivityState {
  /// Record a probe result. Returns true when connectivity was just restored.
  pub fn observe(&mut self, online: bool) -> bool {
    let restored = online && !self.online;
    self.online = online;
    restored
  }

  pub fn is_online(&self) -> bool {
    self.online
  }
}

/// Probes the origin on an interval and emits every sync trigger each time
/// connectivity comes back (including the first successful probe).
pub struct ConnectivityMonitor<N: Network> {
  network: Arc<N>,
  probe_url: Url,
  interval: Duration,
}

impl<N: Network> ConnectivityMonitor<N> {
  pub fn new(network: Arc<N>, probe_url: Url, interval: Duration) -> Self {
    Self {
      network,
      probe_url,
      interval,
    }
  }

  /// Any response counts as online; only a transport failure is offline.
  async fn probe(&self) -> bool {
    match self.network.fetch(Request::head(self.probe_url.clone())).await {
      Ok(_) => true,
      Err(e) => {
        debug!(url = %self.probe_url, "Connectivity probe failed: {}", e);
        false
      }
    }
  }

  /// Spawn the probe loop. It stops once the receiving side is gone.
  pub fn spawn(self, tx: mpsc::UnboundedSender<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      let mut state = ConnectivityState::default();

      loop {
        ticker.tick().await;

        let restored = state.observe(self.probe().await);
        debug!(online = state.is_online(), "Connectivity probed");

        if restored {
          info!("Connectivity restored");
          for trigger in SyncTrigger::ALL {
            if tx.send(Event::Sync(trigger)).is_err() {
              return;
            }
          }
        } else if tx.is_closed() {
          return;
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::fake::FakeNetwork;
  use crate::net::{Response, ResponseKind};

  #[test]
  fn test_only_transitions_restore() {
    let mut state = ConnectivityState::default();
    assert!(!state.observe(false));
    assert!(state.observe(true));
    assert!(!state.observe(true));
    assert!(!state.observe(false));
    assert!(!state.is_online());
    assert!(state.observe(true));
  }

  #[tokio::test]
  async fn test_monitor_emits_triggers_when_back_online() {
    let network = Arc::new(FakeNetwork::new(|_| {
      Ok(Response::new(204, ResponseKind::Basic, ""))
    }));
    network.set_offline(true);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let monitor = ConnectivityMonitor::new(
      Arc::clone(&network),
      Url::parse("https://portal.test/").unwrap(),
      Duration::from_millis(5),
    );
    let handle = monitor.spawn(tx);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(rx.try_recv().is_err());

    network.set_offline(false);
    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert!(matches!(first, Some(Event::Sync(SyncTrigger::Referrals))));
    assert!(matches!(second, Some(Event::Sync(SyncTrigger::Questions))));

    handle.abort();
  }
}
