//! Records mirrored between the remote content store and the local cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One catalogue item (article, disaster report, warning).
///
/// `id` is the only identity key. A successful remote read replaces the
/// whole record; fields are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
  pub id: String,
  /// Kind of content, backs the content-type index (e.g. "article", "warning")
  #[serde(default = "default_content_type")]
  pub content_type: String,
  pub title: String,
  #[serde(default)]
  pub summary: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub author: String,
  #[serde(default)]
  pub cover_image_ref: Option<String>,
  pub published_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

fn default_content_type() -> String {
  "article".to_string()
}

/// Cached rendering of one logical page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshotRecord {
  /// Page path, e.g. "/disasters/latest"
  pub id: String,
  /// Opaque serialized payload
  pub content: String,
  pub cached_at: DateTime<Utc>,
}

/// Process-wide connectivity state. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
  pub is_online: bool,
}
