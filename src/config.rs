use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resource::CachePolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  /// Resource cache eviction policy (precache manifest + runtime rules)
  #[serde(default)]
  pub policy: CachePolicy,
  /// Collections refetched whenever connectivity comes back
  #[serde(default = "default_collections")]
  pub collections: Vec<String>,
  #[serde(default)]
  pub logging: LoggingConfig,
}

fn default_collections() -> Vec<String> {
  vec![
    "articles".to_string(),
    "disasters".to_string(),
    "warnings".to_string(),
  ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Upper bound on the network leg of a fetch
  #[serde(default = "default_fetch_timeout")]
  pub fetch_timeout_secs: u64,
  #[serde(default = "default_health_path")]
  pub health_path: String,
}

fn default_base_url() -> String {
  "http://localhost:8080".to_string()
}

fn default_fetch_timeout() -> u64 {
  8
}

fn default_health_path() -> String {
  "/health".to_string()
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      fetch_timeout_secs: default_fetch_timeout(),
      health_path: default_health_path(),
    }
  }
}

impl RemoteConfig {
  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// SQLite file (default: $XDG_DATA_HOME/reliefsync/cache.db)
  pub path: Option<PathBuf>,
  /// Run network-only, as if the store could not be opened
  #[serde(default)]
  pub disabled: bool,
}

impl CacheConfig {
  pub fn resolved_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(p) => Ok(p.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_probe_interval")]
  pub probe_interval_secs: u64,
  /// Skip probing and pin the initial state
  pub assume_online: Option<bool>,
}

fn default_probe_interval() -> u64 {
  15
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: default_probe_interval(),
      assume_online: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_level")]
  pub level: String,
  /// Also write a daily rolling log file into the data directory
  #[serde(default)]
  pub file: bool,
}

fn default_level() -> String {
  "info".to_string()
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_level(),
      file: false,
    }
  }
}

/// Application data directory ($XDG_DATA_HOME/reliefsync).
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("reliefsync"))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./reliefsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/reliefsync/config.yaml
  ///
  /// Without any file the defaults are used. `RELIEFSYNC_REMOTE_URL`
  /// overrides `remote.base_url`.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config {
        collections: default_collections(),
        ..Default::default()
      },
    };

    if let Ok(url) = std::env::var("RELIEFSYNC_REMOTE_URL") {
      config.remote.base_url = url;
    }

    config.policy.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("reliefsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("reliefsync").join("config.yaml");
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
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resource::Strategy;

  #[test]
  fn test_empty_yaml_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.remote.fetch_timeout(), Duration::from_secs(8));
    assert_eq!(config.collections, vec!["articles", "disasters", "warnings"]);
    assert_eq!(config.policy.runtime.len(), 1);
    assert_eq!(config.policy.runtime[0].strategy, Strategy::NetworkFirst);
    assert!(!config.cache.disabled);
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
remote:
  base_url: https://portal.example.org
  fetch_timeout_secs: 3
cache:
  path: /tmp/relief.db
network:
  assume_online: false
collections: [warnings]
policy:
  precache:
    revision: build-42
    entries:
      - url: https://portal.example.org/
      - url: https://portal.example.org/app.js
        revision: abc123
  runtime:
    - cache_name: api
      url_pattern: "^https://portal\\.example\\.org/api/"
      strategy: network-first
      network_timeout_secs: 5
      max_entries: 50
      max_age_secs: 3600
logging:
  level: debug
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.remote.base_url, "https://portal.example.org");
    assert_eq!(config.remote.fetch_timeout(), Duration::from_secs(3));
    assert_eq!(config.cache.resolved_path().unwrap(), PathBuf::from("/tmp/relief.db"));
    assert_eq!(config.network.assume_online, Some(false));
    assert_eq!(config.collections, vec!["warnings"]);
    assert_eq!(config.policy.precache.entries.len(), 2);
    assert_eq!(config.policy.runtime[0].max_entries, 50);
    assert_eq!(config.logging.level, "debug");
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let result = Config::load(Some(Path::new("/nonexistent/reliefsync.yaml")));
    assert!(result.is_err());
  }
}
