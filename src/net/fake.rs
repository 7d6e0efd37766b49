//! Scripted in-process network for tests.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{Network, Request, Response};

type Handler = Box<dyn Fn(&Request) -> Result<Response> + Send + Sync>;

/// Records every request and answers with a handler closure, or fails every
/// request while switched offline.
pub struct FakeNetwork {
  handler: Handler,
  offline: AtomicBool,
  requests: Mutex<Vec<Request>>,
}

impl FakeNetwork {
  pub fn new(handler: impl Fn(&Request) -> Result<Response> + Send + Sync + 'static) -> Self {
    Self {
      handler: Box::new(handler),
      offline: AtomicBool::new(false),
      requests: Mutex::new(Vec::new()),
    }
  }

  /// A network that is unreachable until switched back online.
  pub fn offline() -> Self {
    let network = Self::new(|request| Err(eyre!("no route to {}", request.url)));
    network.set_offline(true);
    network
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  pub fn request_count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable: {}", request.url));
    }

    (self.handler)(&request)
  }
}
