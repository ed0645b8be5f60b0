use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Immutable configuration shared by every component.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin that relative request and manifest URLs resolve against
  #[serde(deserialize_with = "deserialize_url")]
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Critical assets pre-fetched into the static partition on install
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Document served to navigations when both cache and network miss
  #[serde(default = "default_offline_document")]
  pub offline_document: String,
  #[serde(default)]
  pub routes: RoutesConfig,
  /// How long an API response may be served after a network failure
  #[serde(default = "default_api_ttl_secs")]
  pub api_ttl_secs: u64,
  #[serde(default)]
  pub push: PushConfig,
  #[serde(default)]
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Name prefix that marks partitions as owned by this application
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// Generation tag override; derived from the build when unset
  pub generation: Option<String>,
  /// SQLite database path (default: $XDG_DATA_HOME/offcache/cache.db)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: default_prefix(),
      generation: None,
      database: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  /// Path prefixes served by the backend API
  #[serde(default = "default_api_patterns")]
  pub api_patterns: Vec<String>,
  /// File extensions treated as static assets (case-insensitive)
  #[serde(
    default = "default_static_extensions",
    deserialize_with = "deserialize_lowercase_set"
  )]
  pub static_extensions: BTreeSet<String>,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_patterns: default_api_patterns(),
      static_extensions: default_static_extensions(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
  #[serde(default = "default_icon")]
  pub default_icon: String,
  #[serde(default = "default_badge")]
  pub default_badge: String,
}

impl Default for PushConfig {
  fn default() -> Self {
    Self {
      default_icon: default_icon(),
      default_badge: default_badge(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_prefix() -> String {
  "offcache".to_string()
}

fn default_manifest() -> Vec<String> {
  vec![
    "/".to_string(),
    "/index.html".to_string(),
    "/manifest.json".to_string(),
    "/icons/icon-192.png".to_string(),
  ]
}

fn default_offline_document() -> String {
  "/".to_string()
}

fn default_api_patterns() -> Vec<String> {
  vec![
    "/api/events".to_string(),
    "/api/venues".to_string(),
    "/api/bookings".to_string(),
  ]
}

fn default_static_extensions() -> BTreeSet<String> {
  [
    "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2",
    "ttf", "otf",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn default_api_ttl_secs() -> u64 {
  300
}

fn default_icon() -> String {
  "/icons/icon-192.png".to_string()
}

fn default_badge() -> String {
  "/icons/badge-72.png".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

fn deserialize_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let s = String::deserialize(deserializer)?;
  Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  ///
  /// `OFFCACHE_ORIGIN` overrides the configured origin.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => match std::env::var("OFFCACHE_ORIGIN") {
        Ok(origin) => Self::for_origin(&origin)?,
        Err(_) => {
          return Err(eyre!(
            "No configuration file found. Create one at ~/.config/offcache/config.yaml \
             or set OFFCACHE_ORIGIN."
          ))
        }
      },
    };

    config.with_env_overrides()
  }

  /// Build a configuration with every optional field defaulted.
  pub fn for_origin(origin: &str) -> Result<Self> {
    Self::from_yaml(&format!("origin: {:?}", origin))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn with_env_overrides(mut self) -> Result<Self> {
    if let Ok(origin) = std::env::var("OFFCACHE_ORIGIN") {
      self.origin =
        Url::parse(&origin).map_err(|e| eyre!("Invalid OFFCACHE_ORIGIN '{}': {}", origin, e))?;
    }
    Ok(self)
  }

  fn validate(&self) -> Result<()> {
    if self.cache.prefix.is_empty() || self.cache.prefix.contains(char::is_whitespace) {
      return Err(eyre!("cache.prefix must be a non-empty word"));
    }
    if let Some(generation) = &self.cache.generation {
      if generation.is_empty() {
        return Err(eyre!("cache.generation must not be empty"));
      }
    }
    for entry in &self.manifest {
      self.resolve(entry)?;
    }
    self.resolve(&self.offline_document)?;
    Ok(())
  }

  /// Resolve a possibly-relative URL against the origin.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))
  }

  pub fn api_ttl(&self) -> Duration {
    Duration::from_secs(self.api_ttl_secs)
  }

  /// Get the database path, falling back to the data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.database {
      return Ok(path.clone());
    }

    Ok(Self::data_dir()?.join("cache.db"))
  }

  /// Directory for the database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache"))
  }
}
