//! Remote source of truth for content.

mod http;

use color_eyre::Result;
use std::future::Future;

use crate::model::ContentRecord;

pub use http::HttpRemote;

/// Read-only access to the remote content store.
pub trait RemoteSource: Send + Sync + 'static {
  /// All items of a named collection ("articles", "disasters", "warnings").
  fn fetch_collection(&self, name: &str) -> impl Future<Output = Result<Vec<ContentRecord>>> + Send;

  /// Rendered payload for a logical page path.
  fn render_page(&self, path: &str) -> impl Future<Output = Result<String>> + Send;
}
