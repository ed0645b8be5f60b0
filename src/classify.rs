//! Maps each request to a resource class and the strategy that serves it.

use std::collections::BTreeSet;

use crate::cache::PartitionKind;
use crate::config::Config;
use crate::http::{Destination, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  Image,
  Api,
  Static,
  Navigation,
}

impl ResourceClass {
  /// Partition whose entries serve this class.
  pub fn partition(&self) -> PartitionKind {
    match self {
      Self::Static => PartitionKind::Static,
      Self::Image | Self::Navigation => PartitionKind::Dynamic,
      Self::Api => PartitionKind::Api,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirstWithTtlFallback,
  StaleWhileRevalidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
  pub class: ResourceClass,
  pub strategy: Strategy,
}

struct Rule {
  matches: fn(&RequestClassifier, &Request) -> bool,
  class: ResourceClass,
  strategy: Strategy,
}

/// Evaluated in order, first match wins. Navigation is the fallback.
const RULES: &[Rule] = &[
  Rule {
    matches: is_image,
    class: ResourceClass::Image,
    strategy: Strategy::CacheFirst,
  },
  Rule {
    matches: is_api,
    class: ResourceClass::Api,
    strategy: Strategy::NetworkFirstWithTtlFallback,
  },
  Rule {
    matches: is_static_asset,
    class: ResourceClass::Static,
    strategy: Strategy::CacheFirst,
  },
];

fn is_image(_: &RequestClassifier, request: &Request) -> bool {
  request.destination == Destination::Image
}

fn is_api(classifier: &RequestClassifier, request: &Request) -> bool {
  classifier.is_api_path(request.url.path())
}

fn is_static_asset(classifier: &RequestClassifier, request: &Request) -> bool {
  classifier.has_static_extension(request.url.path())
}

/// Stateless classifier built from the route configuration.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
  api_patterns: Vec<String>,
  static_extensions: BTreeSet<String>,
}

impl RequestClassifier {
  pub fn new(config: &Config) -> Self {
    Self {
      api_patterns: config
        .routes
        .api_patterns
        .iter()
        .map(|p| p.trim_end_matches('/').to_string())
        .collect(),
      static_extensions: config.routes.static_extensions.clone(),
    }
  }

  pub fn classify(&self, request: &Request) -> Classification {
    RULES
      .iter()
      .find(|rule| (rule.matches)(self, request))
      .map(|rule| Classification {
        class: rule.class,
        strategy: rule.strategy,
      })
      .unwrap_or(Classification {
        class: ResourceClass::Navigation,
        strategy: Strategy::StaleWhileRevalidate,
      })
  }

  /// Segment-aware prefix match: `/api/events` matches `/api/events/42`
  /// but not `/api/eventsfeed`.
  fn is_api_path(&self, path: &str) -> bool {
    self.api_patterns.iter().any(|pattern| {
      path
        .strip_prefix(pattern.as_str())
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
  }

  fn has_static_extension(&self, path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
      Some((stem, ext)) if !stem.is_empty() => {
        self.static_extensions.contains(&ext.to_lowercase())
      }
      _ => false,
    }
  }
}
