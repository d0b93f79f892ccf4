//! Process-wide single open of the local cache.

use tokio::sync::OnceCell;

use super::cache::LocalCache;
use crate::config::CacheConfig;

/// Opens the local cache at most once; every caller gets a handle to the
/// same store, including callers that race on the first open.
pub struct SharedCache {
  config: CacheConfig,
  cell: OnceCell<LocalCache>,
}

impl SharedCache {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      config,
      cell: OnceCell::new(),
    }
  }

  pub async fn get_or_open(&self) -> LocalCache {
    self
      .cell
      .get_or_init(|| async {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || LocalCache::open(&config))
          .await
          .unwrap_or_else(|e| LocalCache::unavailable(format!("cache open task failed: {}", e)))
      })
      .await
      .clone()
  }
}
