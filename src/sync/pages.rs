//! Page loading with whole-page offline fallback.

use std::collections::BTreeSet;
use tracing::{debug, warn};
use url::Url;

use super::orchestrator::SyncOrchestrator;
use super::result::{PageResult, Source};
use crate::error::{NoDataReason, SyncError};
use crate::remote::RemoteSource;
use crate::resource::CachedResponse;

impl<R: RemoteSource> SyncOrchestrator<R> {
  /// Load a rendered page.
  ///
  /// Online, the page is rendered remotely and snapshotted. Otherwise, or
  /// if rendering fails, the stored snapshot is served, then the resource
  /// cache's copy of the page URL. Freshness comes from the snapshot's
  /// `cached_at` or the cached response's date header; it stays unknown
  /// when neither is available.
  pub async fn load_page(&self, path: &str) -> Result<PageResult, SyncError> {
    if !self.network.is_online() {
      return self
        .page_fallback(path, Source::Cache, None)
        .ok_or(SyncError::no_data(NoDataReason::Offline));
    }

    let rendered = tokio::time::timeout(self.fetch_timeout, self.remote.render_page(path)).await;
    let failure = match rendered {
      Ok(Ok(content)) => {
        let error = self.snapshot(path, &content).await.err();
        return Ok(PageResult {
          path: path.to_string(),
          content,
          source: Source::Network,
          last_updated: Some(chrono::Utc::now()),
          degraded: false,
          error,
        });
      }
      Ok(Err(e)) => format!("{:#}", e),
      Err(_) => format!("timed out after {:?}", self.fetch_timeout),
    };

    warn!(path, "Page render failed: {}", failure);
    self
      .page_fallback(path, Source::StaleCache, Some(SyncError::RemoteFetchFailed(failure)))
      .ok_or(SyncError::no_data(NoDataReason::RemoteUnreachable))
  }

  /// Store a rendered page off the async workers.
  async fn snapshot(&self, path: &str, content: &str) -> Result<(), SyncError> {
    let cache = self.cache.clone();
    let path = path.to_string();
    let content = content.to_string();

    tokio::task::spawn_blocking(move || cache.put_page_snapshot(&path, &content))
      .await
      .unwrap_or_else(|e| {
        Err(SyncError::PartialWriteFailure(format!(
          "page snapshot task failed: {}",
          e
        )))
      })
  }

  fn page_fallback(&self, path: &str, source: Source, error: Option<SyncError>) -> Option<PageResult> {
    let degraded = source == Source::StaleCache;

    if let Some(snapshot) = self.cache.get_page_snapshot(path) {
      debug!(path, "Serving page snapshot");
      return Some(PageResult {
        path: path.to_string(),
        content: snapshot.content,
        source,
        last_updated: Some(snapshot.cached_at),
        degraded,
        error,
      });
    }

    let url = self.page_url(path)?;
    let response = self.resources.as_ref()?.lookup(url.as_str())?;
    debug!(path, "Serving page from resource cache");

    Some(PageResult {
      path: path.to_string(),
      last_updated: response.date(),
      content: response.body,
      source,
      degraded,
      error,
    })
  }

  fn page_url(&self, path: &str) -> Option<Url> {
    self.site.as_ref()?.join(path).ok()
  }

  /// Paths viewable offline: stored snapshots plus same-site pages held in
  /// the resource cache. Cached assets (scripts, styles, images) are not
  /// pages and are left out.
  pub fn offline_pages(&self) -> Vec<String> {
    let mut paths: BTreeSet<String> = self.cache.page_snapshot_paths().into_iter().collect();

    if let (Some(resources), Some(site)) = (&self.resources, &self.site) {
      for cached in resources.cached_urls() {
        let Ok(url) = Url::parse(&cached) else {
          continue;
        };
        if url.origin() != site.origin() {
          continue;
        }
        if let Some(response) = resources.lookup(&cached) {
          if is_page(&url, &response) {
            paths.insert(url.path().to_string());
          }
        }
      }
    }

    paths.into_iter().collect()
  }
}

/// HTML by content type; without one, a path whose last segment has no
/// file extension.
fn is_page(url: &Url, response: &CachedResponse) -> bool {
  if let Some(content_type) = response.header("content-type") {
    return content_type
      .trim_start()
      .to_ascii_lowercase()
      .starts_with("text/html");
  }

  let last = url.path().rsplit('/').next().unwrap_or_default();
  !last.contains('.')
}
