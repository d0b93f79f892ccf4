//! Declarative eviction policy for the resource snapshot cache.

use color_eyre::{eyre::eyre, Result};
use regex_lite::Regex;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct CachePolicy {
  #[serde(default)]
  pub precache: PrecacheManifest,
  /// Checked in order; the first matching rule handles a URL
  #[serde(default = "default_runtime_rules")]
  pub runtime: Vec<RuntimeRule>,
}

impl Default for CachePolicy {
  fn default() -> Self {
    Self {
      precache: PrecacheManifest::default(),
      runtime: default_runtime_rules(),
    }
  }
}

fn default_runtime_rules() -> Vec<RuntimeRule> {
  vec![RuntimeRule {
    cache_name: "offline-cache".to_string(),
    url_pattern: "^https?://".to_string(),
    strategy: Strategy::NetworkFirst,
    network_timeout_secs: default_network_timeout(),
    max_entries: default_max_entries(),
    max_age_secs: default_max_age(),
  }]
}

impl CachePolicy {
  /// Reject patterns that do not compile and limits that disable a cache
  /// or cannot be represented as a time span.
  pub fn validate(&self) -> Result<()> {
    for rule in &self.runtime {
      rule.compile()?;
      if rule.max_entries == 0 {
        return Err(eyre!("Runtime cache '{}' has max_entries = 0", rule.cache_name));
      }
      if time_delta(rule.max_age_secs).is_none() {
        return Err(eyre!(
          "Runtime cache '{}' has out of range max_age_secs = {}",
          rule.cache_name,
          rule.max_age_secs
        ));
      }
      if time_delta(rule.network_timeout_secs).is_none() {
        return Err(eyre!(
          "Runtime cache '{}' has out of range network_timeout_secs = {}",
          rule.cache_name,
          rule.network_timeout_secs
        ));
      }
    }
    Ok(())
  }
}

/// Shell pages and build assets fetched at install time.
///
/// Never expired by size or age; a manifest with a different `revision`
/// replaces the whole set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrecacheManifest {
  #[serde(default)]
  pub revision: String,
  #[serde(default)]
  pub entries: Vec<PrecacheEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrecacheEntry {
  pub url: String,
  /// Content revision; when absent the body hash is used
  pub revision: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  /// Try the network within the timeout, fall back to the cache
  NetworkFirst,
  /// Serve from cache when present, otherwise fetch and store
  CacheFirst,
  /// Never cache
  NetworkOnly,
}

/// Lazily populated cache for URLs matching `url_pattern`.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeRule {
  pub cache_name: String,
  pub url_pattern: String,
  #[serde(default = "default_strategy")]
  pub strategy: Strategy,
  #[serde(default = "default_network_timeout")]
  pub network_timeout_secs: u64,
  #[serde(default = "default_max_entries")]
  pub max_entries: usize,
  /// Entries older than this are treated as absent
  #[serde(default = "default_max_age")]
  pub max_age_secs: u64,
}

fn default_strategy() -> Strategy {
  Strategy::NetworkFirst
}

fn default_network_timeout() -> u64 {
  10
}

fn default_max_entries() -> usize {
  200
}

fn default_max_age() -> u64 {
  24 * 60 * 60
}

impl RuntimeRule {
  pub fn compile(&self) -> Result<Regex> {
    Regex::new(&self.url_pattern).map_err(|e| {
      eyre!(
        "Invalid url_pattern for runtime cache '{}': {}",
        self.cache_name,
        e
      )
    })
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.network_timeout_secs)
  }

  /// Saturates at the largest representable span.
  pub fn max_age(&self) -> chrono::TimeDelta {
    time_delta(self.max_age_secs).unwrap_or(chrono::TimeDelta::MAX)
  }
}

fn time_delta(secs: u64) -> Option<chrono::TimeDelta> {
  i64::try_from(secs)
    .ok()
    .and_then(chrono::TimeDelta::try_seconds)
}
