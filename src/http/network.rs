//! The network primitive the cache treats as an opaque oracle.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{Headers, Request, Response};
use crate::config::Config;
use crate::error::CacheError;

/// Performs one network round trip.
///
/// Any HTTP status is a successful round trip; only transport failures
/// (DNS, connect, timeout, aborted body) are errors.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, CacheError>;
}

/// reqwest-backed network client
#[derive(Clone)]
pub struct ReqwestNetwork {
  client: reqwest::Client,
}

impl ReqwestNetwork {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.network.timeout_secs))
      .gzip(true)
      .deflate(true)
      .user_agent(concat!("offcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for ReqwestNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in request.headers.iter() {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| CacheError::NetworkUnavailable(format!("{} {}: {}", request.method, request.url, e)))?;

    let status = response.status().as_u16();
    let headers = collect_headers(&request.url, response.headers());

    let body = response
      .bytes()
      .await
      .map_err(|e| CacheError::NetworkUnavailable(format!("{}: body aborted: {}", request.url, e)))?;

    debug!(method = %request.method, url = %request.url, status, "network response");

    Ok(Response::new(status, headers, body.to_vec()))
  }
}

/// Copy response headers in wire order. Values that are not valid UTF-8
/// cannot be stored and are dropped.
fn collect_headers(url: &Url, map: &HeaderMap) -> Headers {
  let mut headers = Headers::new();
  for (name, value) in map {
    match value.to_str() {
      Ok(v) => headers.append(name.as_str(), v),
      Err(_) => debug!(url = %url, header = %name, "dropping non-UTF-8 header value"),
    }
  }
  headers
}
