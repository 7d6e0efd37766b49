use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::{Origin, Url};

use super::{Network, Request, Response, ResponseKind};

/// reqwest-backed network.
///
/// Responses from the worker's own origin are classified as
/// [`ResponseKind::Basic`], everything else as [`ResponseKind::Cors`].
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpNetwork {
  pub fn new(origin: &Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
    })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: Request) -> Result<Response> {
    let requested = request.url.clone();

    let mut builder = self.client.request(request.method, request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", requested, e))?;

    let status = response.status();
    let final_url = response.url().clone();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", requested, e))?;

    let kind = if final_url.origin() == self.origin {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
      kind,
      redirected: without_fragment(&final_url) != without_fragment(&requested),
    })
  }
}

fn without_fragment(url: &Url) -> Url {
  let mut url = url.clone();
  url.set_fragment(None);
  url
}
