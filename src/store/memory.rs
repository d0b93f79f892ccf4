//! In-memory content store, for tests and for running without a disk.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::traits::{ContentIndex, ContentStore};
use crate::model::{ContentRecord, PageSnapshotRecord};

#[derive(Default)]
struct MemoryState {
  items: HashMap<String, ContentRecord>,
  members: HashMap<String, Vec<String>>,
  synced: HashMap<String, DateTime<Utc>>,
  pages: HashMap<String, PageSnapshotRecord>,
}

/// Content store kept entirely in process memory.
///
/// Writes can be made to fail with [`MemoryStore::fail_writes`] to exercise
/// rollback handling; a failing write leaves the state untouched.
#[derive(Default)]
pub struct MemoryStore {
  state: Mutex<MemoryState>,
  fail_writes: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
    self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn check_writable(&self) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      Err(eyre!("Simulated write failure"))
    } else {
      Ok(())
    }
  }
}

impl ContentStore for MemoryStore {
  fn upsert_many(&self, items: &[ContentRecord]) -> Result<()> {
    self.check_writable()?;
    let mut state = self.state()?;
    for item in items {
      state.items.insert(item.id.clone(), item.clone());
    }
    Ok(())
  }

  fn replace_collection(
    &self,
    collection: &str,
    items: &[ContentRecord],
    synced_at: DateTime<Utc>,
  ) -> Result<usize> {
    self.check_writable()?;
    let mut state = self.state()?;

    let mut order: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
      state.items.insert(item.id.clone(), item.clone());
      if !order.contains(&item.id) {
        order.push(item.id.clone());
      }
    }

    let previous = state
      .members
      .insert(collection.to_string(), order)
      .unwrap_or_default();
    let still_referenced: HashSet<String> = state.members.values().flatten().cloned().collect();

    let mut removed = 0;
    for id in previous {
      if !still_referenced.contains(&id) && state.items.remove(&id).is_some() {
        removed += 1;
      }
    }

    state.synced.insert(collection.to_string(), synced_at);
    Ok(removed)
  }

  fn get_all(&self) -> Result<Vec<ContentRecord>> {
    Ok(self.state()?.items.values().cloned().collect())
  }

  fn get_collection(&self, collection: &str) -> Result<Vec<ContentRecord>> {
    let state = self.state()?;
    let records: Vec<ContentRecord> = state
      .members
      .get(collection)
      .map(|ids| ids.iter().filter_map(|id| state.items.get(id)).cloned().collect())
      .unwrap_or_default();
    Ok(records)
  }

  fn collection_synced_at(&self, collection: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(self.state()?.synced.get(collection).copied())
  }

  fn get_by_index(&self, index: ContentIndex, value: &str) -> Result<Vec<ContentRecord>> {
    let state = self.state()?;
    let mut records = index.select(state.items.values(), value)?;
    records.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    Ok(records)
  }

  fn put_page_snapshot(&self, path: &str, content: &str, cached_at: DateTime<Utc>) -> Result<()> {
    self.check_writable()?;
    self.state()?.pages.insert(
      path.to_string(),
      PageSnapshotRecord {
        id: path.to_string(),
        content: content.to_string(),
        cached_at,
      },
    );
    Ok(())
  }

  fn get_page_snapshot(&self, path: &str) -> Result<Option<PageSnapshotRecord>> {
    Ok(self.state()?.pages.get(path).cloned())
  }

  fn page_snapshot_paths(&self) -> Result<Vec<String>> {
    let mut paths: Vec<String> = self.state()?.pages.keys().cloned().collect();
    paths.sort();
    Ok(paths)
  }

  fn clear(&self) -> Result<()> {
    self.check_writable()?;
    *self.state()? = MemoryState::default();
    Ok(())
  }
}
