//! Failure-isolating facade over a [`ContentStore`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::sqlite::SqliteStore;
use super::traits::{ContentIndex, ContentStore};
use crate::config::CacheConfig;
use crate::error::SyncError;
use crate::model::{ContentRecord, PageSnapshotRecord};

/// Cached members of a collection plus when they were reconciled.
#[derive(Debug, Clone, Default)]
pub struct CachedCollection {
  pub records: Vec<ContentRecord>,
  pub synced_at: Option<DateTime<Utc>>,
}

impl CachedCollection {
  /// Best known freshness: the reconciliation time, else the newest record.
  /// `None` when neither exists.
  pub fn last_updated(&self) -> Option<DateTime<Utc>> {
    self
      .synced_at
      .or_else(|| self.records.iter().map(|r| r.updated_at).max())
  }
}

/// Handle to the structured local cache.
///
/// Storage errors stop here. When the store could not be opened, reads
/// return nothing and writes are logged no-ops, so callers degrade to
/// network-only. A failed batch write reports
/// [`SyncError::PartialWriteFailure`]; the store has already rolled it back.
#[derive(Clone)]
pub struct LocalCache {
  store: Option<Arc<dyn ContentStore>>,
  unavailable_reason: Option<String>,
}

impl LocalCache {
  pub fn new<S: ContentStore + 'static>(store: S) -> Self {
    Self::from_store(Arc::new(store))
  }

  pub fn from_store(store: Arc<dyn ContentStore>) -> Self {
    Self {
      store: Some(store),
      unavailable_reason: None,
    }
  }

  /// A cache that could not be opened.
  pub fn unavailable(reason: impl Into<String>) -> Self {
    let reason = reason.into();
    warn!("Local cache unavailable, continuing network-only: {}", reason);
    Self {
      store: None,
      unavailable_reason: Some(reason),
    }
  }

  /// Open the SQLite store described by `config`. Never fails; open
  /// errors yield an unavailable cache.
  pub fn open(config: &CacheConfig) -> Self {
    if config.disabled {
      return Self::unavailable("disabled by configuration");
    }

    let opened = config
      .resolved_path()
      .and_then(|path| SqliteStore::open(&path).map(|store| (path, store)));

    match opened {
      Ok((path, store)) => {
        info!(path = %path.display(), "Opened local cache");
        Self::new(store)
      }
      Err(e) => Self::unavailable(format!("{:#}", e)),
    }
  }

  pub fn is_available(&self) -> bool {
    self.store.is_some()
  }

  /// `Err(StoreUnavailable)` when the cache could not be opened.
  pub fn status(&self) -> Result<(), SyncError> {
    match &self.unavailable_reason {
      Some(reason) => Err(SyncError::StoreUnavailable(reason.clone())),
      None => Ok(()),
    }
  }

  /// Whether two handles share one underlying store.
  pub fn same_store(&self, other: &LocalCache) -> bool {
    match (&self.store, &other.store) {
      (Some(a), Some(b)) => Arc::ptr_eq(a, b),
      _ => false,
    }
  }

  fn write<T>(
    &self,
    what: &str,
    op: impl FnOnce(&dyn ContentStore) -> color_eyre::Result<T>,
  ) -> Result<Option<T>, SyncError> {
    let Some(store) = &self.store else {
      debug!("Skipping {}: local cache unavailable", what);
      return Ok(None);
    };

    op(&**store).map(Some).map_err(|e| {
      warn!("Cache write failed ({}): {:#}", what, e);
      SyncError::PartialWriteFailure(format!("{}: {:#}", what, e))
    })
  }

  fn read<T: Default>(
    &self,
    what: &str,
    op: impl FnOnce(&dyn ContentStore) -> color_eyre::Result<T>,
  ) -> T {
    let Some(store) = &self.store else {
      return T::default();
    };

    op(&**store).unwrap_or_else(|e| {
      warn!("Cache read failed ({}), treating as empty: {:#}", what, e);
      T::default()
    })
  }

  /// Insert or replace each record by id, all or nothing.
  pub fn upsert_many(&self, items: &[ContentRecord]) -> Result<(), SyncError> {
    self
      .write("upsert", |store| store.upsert_many(items))
      .map(|_| ())
  }

  /// Make `collection` mirror `items` exactly. Returns how many stale
  /// records were dropped (zero when the cache is unavailable).
  pub fn replace_collection(
    &self,
    collection: &str,
    items: &[ContentRecord],
    synced_at: DateTime<Utc>,
  ) -> Result<usize, SyncError> {
    self
      .write("reconcile", |store| {
        store.replace_collection(collection, items, synced_at)
      })
      .map(Option::unwrap_or_default)
  }

  pub fn get_all(&self) -> Vec<ContentRecord> {
    self.read("get_all", |store| store.get_all())
  }

  pub fn get_collection(&self, collection: &str) -> CachedCollection {
    self.read("get_collection", |store| {
      Ok(CachedCollection {
        records: store.get_collection(collection)?,
        synced_at: store.collection_synced_at(collection)?,
      })
    })
  }

  pub fn get_by_index(&self, index: ContentIndex, value: &str) -> Vec<ContentRecord> {
    self.read("get_by_index", |store| store.get_by_index(index, value))
  }

  /// Store a snapshot for `path`, stamped now.
  pub fn put_page_snapshot(&self, path: &str, content: &str) -> Result<(), SyncError> {
    self
      .write("page snapshot", |store| {
        store.put_page_snapshot(path, content, Utc::now())
      })
      .map(|_| ())
  }

  pub fn get_page_snapshot(&self, path: &str) -> Option<PageSnapshotRecord> {
    self.read("get_page_snapshot", |store| store.get_page_snapshot(path))
  }

  pub fn page_snapshot_paths(&self) -> Vec<String> {
    self.read("page_snapshot_paths", |store| store.page_snapshot_paths())
  }

  pub fn clear(&self) -> Result<(), SyncError> {
    self.write("clear", |store| store.clear()).map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::fixtures::record;
  use crate::store::MemoryStore;

  #[test]
  fn test_unavailable_cache_reads_empty_and_ignores_writes() {
    let cache = LocalCache::unavailable("quota exceeded");

    assert!(!cache.is_available());
    assert!(matches!(cache.status(), Err(SyncError::StoreUnavailable(_))));
    assert!(cache.upsert_many(&[record("a", "A", 1)]).is_ok());
    assert_eq!(cache.replace_collection("articles", &[], Utc::now()), Ok(0));
    assert!(cache.put_page_snapshot("/", "home").is_ok());
    assert!(cache.get_all().is_empty());
    assert!(cache.get_collection("articles").records.is_empty());
    assert!(cache.get_page_snapshot("/").is_none());
  }

  #[test]
  fn test_open_failure_degrades_instead_of_erroring() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let cache = LocalCache::open(&CacheConfig {
      path: Some(blocker.join("cache.db")),
      disabled: false,
    });

    assert!(!cache.is_available());
    assert!(cache.get_all().is_empty());
  }

  #[test]
  fn test_disabled_cache_is_unavailable() {
    let cache = LocalCache::open(&CacheConfig {
      path: None,
      disabled: true,
    });
    assert!(matches!(cache.status(), Err(SyncError::StoreUnavailable(_))));
  }

  #[test]
  fn test_open_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = LocalCache::open(&CacheConfig {
      path: Some(dir.path().join("cache.db")),
      disabled: false,
    });

    assert!(cache.is_available());
    cache.upsert_many(&[record("a", "A", 1)]).unwrap();
    assert_eq!(cache.get_all().len(), 1);
  }

  #[test]
  fn test_failed_write_is_reported_and_previous_contents_survive() {
    let store = Arc::new(MemoryStore::new());
    let cache = LocalCache::from_store(store.clone());
    cache
      .replace_collection("articles", &[record("a", "A", 1)], Utc::now())
      .unwrap();

    store.fail_writes(true);
    let result = cache.replace_collection("articles", &[record("b", "B", 2)], Utc::now());

    assert!(matches!(result, Err(SyncError::PartialWriteFailure(_))));
    let ids: Vec<String> = cache
      .get_collection("articles")
      .records
      .into_iter()
      .map(|r| r.id)
      .collect();
    assert_eq!(ids, vec!["a"]);
  }

  #[test]
  fn test_last_updated_prefers_sync_time_and_never_invents_one() {
    let synced = Utc::now();
    let records = vec![record("a", "A", 1), record("b", "B", 3)];

    let with_sync = CachedCollection {
      records: records.clone(),
      synced_at: Some(synced),
    };
    let without_sync = CachedCollection {
      records: records.clone(),
      synced_at: None,
    };

    assert_eq!(with_sync.last_updated(), Some(synced));
    assert_eq!(without_sync.last_updated(), Some(records[1].updated_at));
    assert_eq!(CachedCollection::default().last_updated(), None);
  }
}
