use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SyncError;
use crate::model::ContentRecord;

/// Where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
  /// Fresh remote read
  Network,
  /// Offline read of the local cache
  Cache,
  /// Online, but the remote failed; local cache served instead
  StaleCache,
}

impl Source {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::StaleCache => "stale-cache",
    }
  }
}

/// Result of a collection fetch.
#[derive(Debug, Clone)]
pub struct CollectionResult {
  pub data: Vec<ContentRecord>,
  pub source: Source,
  /// True timestamp of the data, or `None` when unknown. Never the time
  /// of the read for cached data.
  pub last_updated: Option<DateTime<Utc>>,
  /// Served from cache because the remote failed
  pub degraded: bool,
  /// What went wrong, if anything: the remote failure behind a degraded
  /// response, or a rolled-back cache write behind a network response.
  pub error: Option<SyncError>,
}

impl CollectionResult {
  /// Whether the UI must show a cached/offline notice.
  pub fn is_cached(&self) -> bool {
    self.source != Source::Network
  }
}

/// Result of a page load.
#[derive(Debug, Clone)]
pub struct PageResult {
  pub path: String,
  pub content: String,
  pub source: Source,
  pub last_updated: Option<DateTime<Utc>>,
  pub degraded: bool,
  pub error: Option<SyncError>,
}

impl PageResult {
  pub fn is_cached(&self) -> bool {
    self.source != Source::Network
  }
}
