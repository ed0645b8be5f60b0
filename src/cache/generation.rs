//! Partition naming and generation garbage collection.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::Config;

/// Logical partition names known to this application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
  Static,
  Dynamic,
  Api,
}

impl PartitionKind {
  pub const ALL: [PartitionKind; 3] = [Self::Static, Self::Dynamic, Self::Api];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Dynamic => "dynamic",
      Self::Api => "api",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|k| k.as_str() == s)
  }
}

/// Stored partition identity: `<prefix>-<kind>-<generation>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionId {
  pub prefix: String,
  pub kind: PartitionKind,
  pub generation: String,
}

impl PartitionId {
  /// Parse a stored partition name. Returns `None` for names outside `prefix`
  /// or with an unknown logical name.
  pub fn parse(prefix: &str, name: &str) -> Option<Self> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
    let (kind, generation) = rest.split_once('-')?;
    if generation.is_empty() {
      return None;
    }

    Some(Self {
      prefix: prefix.to_string(),
      kind: PartitionKind::parse(kind)?,
      generation: generation.to_string(),
    })
  }
}

impl fmt::Display for PartitionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}-{}", self.prefix, self.kind.as_str(), self.generation)
  }
}

/// Knows the active generation and which stored partitions it supersedes.
#[derive(Debug, Clone)]
pub struct GenerationManager {
  prefix: String,
  active: String,
}

impl GenerationManager {
  pub fn new(prefix: impl Into<String>, active: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      active: active.into(),
    }
  }

  /// Use the configured generation, or derive one from the crate version and
  /// the install manifest so that a changed manifest starts a new generation.
  pub fn from_config(config: &Config) -> Self {
    let active = match &config.cache.generation {
      Some(generation) => generation.clone(),
      None => derive_generation(env!("CARGO_PKG_VERSION"), &config.manifest),
    };
    Self::new(config.cache.prefix.clone(), active)
  }

  pub fn active(&self) -> &str {
    &self.active
  }

  /// Name of the active partition for `kind`.
  pub fn partition(&self, kind: PartitionKind) -> String {
    PartitionId {
      prefix: self.prefix.clone(),
      kind,
      generation: self.active.clone(),
    }
    .to_string()
  }

  /// Whether a stored partition is superseded and may be deleted.
  ///
  /// Only names of the form `<prefix>-<known kind>-<generation>` with a
  /// generation other than the active one qualify.
  pub fn is_stale(&self, name: &str) -> bool {
    PartitionId::parse(&self.prefix, name).is_some_and(|id| id.generation != self.active)
  }

  /// Filter a partition listing down to the names activation should delete.
  pub fn stale_partitions<'a>(&self, names: &'a [String]) -> Vec<&'a str> {
    names
      .iter()
      .map(String::as_str)
      .filter(|name| self.is_stale(name))
      .collect()
  }
}

fn derive_generation(version: &str, manifest: &[String]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(version.as_bytes());
  for entry in manifest {
    hasher.update(b"\n");
    hasher.update(entry.as_bytes());
  }
  let digest = hex::encode(hasher.finalize());
  format!("v{}.{}", version, &digest[..8])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partition_name_round_trip() {
    let manager = GenerationManager::new("evently", "v3");
    let name = manager.partition(PartitionKind::Api);
    assert_eq!(name, "evently-api-v3");

    let id = PartitionId::parse("evently", &name).unwrap();
    assert_eq!(id.kind, PartitionKind::Api);
    assert_eq!(id.generation, "v3");
  }

  #[test]
  fn test_generation_may_contain_dashes() {
    let id = PartitionId::parse("evently", "evently-static-2024-05-01").unwrap();
    assert_eq!(id.kind, PartitionKind::Static);
    assert_eq!(id.generation, "2024-05-01");
  }

  #[test]
  fn test_stale_selection() {
    let manager = GenerationManager::new("evently", "v3");
    let names: Vec<String> = [
      "evently-static-v2",
      "evently-dynamic-v2",
      "evently-static-v3",
      "evently-api-v3",
      "other-static-v1",
      "evently-images-v1",
      "evently-static-",
      "eventlyx-static-v1",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    assert_eq!(
      manager.stale_partitions(&names),
      vec!["evently-static-v2", "evently-dynamic-v2"]
    );
  }

  #[test]
  fn test_derived_generation_tracks_manifest() {
    let a = derive_generation("1.0.0", &["/".to_string()]);
    let b = derive_generation("1.0.0", &["/".to_string(), "/app.js".to_string()]);
    assert_ne!(a, b);
    assert_eq!(a, derive_generation("1.0.0", &["/".to_string()]));
    assert!(a.starts_with("v1.0.0."));
  }

  #[test]
  fn test_configured_generation_wins() {
    let config = crate::config::Config::from_yaml(
      r#"
origin: "https://events.example.com"
cache:
  prefix: "evently"
  generation: "v9"
"#,
    )
    .unwrap();
    let manager = GenerationManager::from_config(&config);
    assert_eq!(manager.active(), "v9");
    assert_eq!(manager.partition(PartitionKind::Static), "evently-static-v9");
  }
}
