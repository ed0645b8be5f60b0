//! Request and response types that flow through the cache.

mod network;

pub use network::{Network, ReqwestNetwork};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Ordered header multimap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a value, keeping any existing values for the same name.
  pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.0.push((name.into(), value.into()));
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
  fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
    Self(
      iter
        .into_iter()
        .map(|(n, v)| (n.into(), v.into()))
        .collect(),
    )
  }
}

/// What the requesting context intends to do with the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  Document,
  Image,
  Script,
  Style,
  Font,
  /// fetch()/XHR and anything else without a declared destination
  #[default]
  Empty,
}

/// An outbound request as seen by the cache.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: Destination::Empty,
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, headers: Headers, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
    }
  }

  /// Whether the response is worth storing (2xx).
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Stand-in for an optional asset that could not be fetched.
  pub fn synthetic_not_found() -> Self {
    Self::plain_text(404, "Not Found")
  }

  /// Stand-in for a navigation when neither the network nor the offline
  /// document is available.
  pub fn synthetic_offline() -> Self {
    Self::plain_text(503, "Offline")
  }

  fn plain_text(status: u16, body: &str) -> Self {
    let headers = [("content-type", "text/plain; charset=utf-8")]
      .into_iter()
      .collect();
    Self::new(status, headers, body.as_bytes().to_vec())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_headers_preserve_order_and_duplicates() {
    let mut headers = Headers::new();
    headers.append("Set-Cookie", "a=1");
    headers.append("Content-Type", "text/html");
    headers.append("set-cookie", "b=2");

    let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["Set-Cookie", "Content-Type", "set-cookie"]);
    let cookies: Vec<&str> = headers
      .iter()
      .filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
      .map(|(_, v)| v)
      .collect();
    assert_eq!(cookies, vec!["a=1", "b=2"]);
    assert_eq!(headers.len(), 3);
  }

  #[test]
  fn test_success_range() {
    assert!(Response::new(204, Headers::new(), Vec::new()).is_success());
    assert!(!Response::new(304, Headers::new(), Vec::new()).is_success());
    assert!(!Response::synthetic_not_found().is_success());
    assert_eq!(Response::synthetic_offline().status, 503);
  }
}
