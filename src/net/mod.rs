//! Request and response snapshots and the network seam.
//!
//! Everything above this module talks to a [`Network`]; the worker binary
//! plugs in [`HttpNetwork`], tests plug in a scripted fake.

mod http;
#[cfg(test)]
pub mod fake;

pub use http::HttpNetwork;

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use url::Url;

/// How a request was initiated by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  SameOrigin,
  Cors,
}

/// A request as seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// Plain GET, as issued by a subresource load.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Cors,
      headers: Vec::new(),
      body: None,
    }
  }

  /// GET issued by a top-level navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn head(url: Url) -> Self {
    Self {
      method: Method::HEAD,
      ..Self::get(url)
    }
  }

  /// POST with a JSON body.
  pub fn post_json(url: Url, payload: &serde_json::Value) -> Result<Self> {
    let body =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;

    Ok(Self {
      method: Method::POST,
      url,
      mode: RequestMode::SameOrigin,
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: Some(body),
    })
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Canonical identity used to key cached responses: method plus URL
  /// without its fragment.
  pub fn identity(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    format!("{} {}", self.method, url)
  }
}

/// Response classification, mirroring what a browser exposes as
/// `Response.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response with full access to status, headers and body
  Basic,
  /// Cross-origin response from a trusted host
  Cors,
  /// Cross-origin response without readable contents
  Opaque,
  /// Built locally rather than received from the network
  Synthetic,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Synthetic => "synthetic",
    }
  }
}

impl fmt::Display for ResponseKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResponseKind {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      "synthetic" => Ok(Self::Synthetic),
      other => Err(eyre!("Unknown response kind '{}'", other)),
    }
  }
}

/// A fully buffered response snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
  /// Whether the network followed at least one redirect
  pub redirected: bool,
}

impl Response {
  pub fn new(status: u16, kind: ResponseKind, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string(),
      headers: Vec::new(),
      body: body.into(),
      kind,
      redirected: false,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// `503 Service Unavailable` built locally when neither network nor
  /// cache can answer.
  pub fn service_unavailable(body: &str, content_type: Option<&str>) -> Self {
    let response = Self::new(503, ResponseKind::Synthetic, body);
    match content_type {
      Some(ct) => response.with_header("Content-Type", ct),
      None => response,
    }
  }

  /// Any 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only a plain `200`, same-origin, non-redirected response may be
  /// written to the cache at fetch time.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic && !self.redirected
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Transport to the outside world.
///
/// `Err` means the request never produced a response (unreachable host,
/// timeout, TLS failure). HTTP error statuses are returned as `Ok`.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;
}
