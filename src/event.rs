use tokio::sync::mpsc;
use tracing::info;

use crate::sync::SyncTrigger;

/// Worker events delivered while running as a long-lived process
#[derive(Debug)]
pub enum Event {
  /// Connectivity came back; drain one queue
  Sync(SyncTrigger),
  /// Stop accepting events and finish outstanding work
  Shutdown,
}

/// Event handler that merges sync triggers with the Ctrl-C signal
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn shutdown listener
    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
        let _ = shutdown_tx.send(Event::Shutdown);
      }
    });

    Self { tx, rx }
  }

  /// Sender for event producers such as the connectivity monitor
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
