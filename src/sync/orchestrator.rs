//! Network-or-cache decision and reconciliation per collection.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::result::{CollectionResult, Source};
use super::scope::ViewScope;
use crate::error::{NoDataReason, SyncError};
use crate::model::{ContentRecord, NetworkState};
use crate::network::{NetworkMonitor, Subscription};
use crate::remote::RemoteSource;
use crate::resource::ResourceSnapshots;
use crate::store::{ContentIndex, LocalCache};

pub type CycleOutcome = Result<CollectionResult, SyncError>;
type Cycle = Shared<BoxFuture<'static, CycleOutcome>>;

/// Read/write-through access to remote content with offline fallback.
///
/// For each request:
/// - offline: serve the cached collection (`Cache`), or `NoCachedData(Offline)`
/// - online: fetch (bounded by the fetch timeout), replace the cached
///   collection, return the fetched data (`Network`)
/// - online but the fetch fails: serve the cached collection flagged
///   `degraded` (`StaleCache`), or `NoCachedData(RemoteUnreachable)`
///
/// Online cycles for one collection never overlap: a request arriving
/// while a cycle is in flight joins it. Cycles run on their own task, so
/// dropping the caller does not interrupt a reconciliation. A cycle task
/// that dies (panic, abort) is answered like a failed fetch, and the next
/// request starts a fresh cycle.
pub struct SyncOrchestrator<R: RemoteSource> {
  pub(super) remote: Arc<R>,
  pub(super) cache: LocalCache,
  pub(super) network: NetworkMonitor,
  pub(super) resources: Option<Arc<dyn ResourceSnapshots>>,
  pub(super) site: Option<Url>,
  pub(super) fetch_timeout: Duration,
  in_flight: Arc<Mutex<HashMap<String, Cycle>>>,
}

impl<R: RemoteSource> SyncOrchestrator<R> {
  pub fn new(remote: R, cache: LocalCache, network: NetworkMonitor) -> Self {
    Self {
      remote: Arc::new(remote),
      cache,
      network,
      resources: None,
      site: None,
      fetch_timeout: Duration::from_secs(8),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Bound on the network leg of every fetch.
  pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
    self.fetch_timeout = timeout;
    self
  }

  /// Resource snapshot cache used for whole-page fallback; page paths are
  /// resolved against `site`.
  pub fn with_resources(mut self, resources: Arc<dyn ResourceSnapshots>, site: Url) -> Self {
    self.resources = Some(resources);
    self.site = Some(site);
    self
  }

  pub fn cache(&self) -> &LocalCache {
    &self.cache
  }

  pub fn network_status(&self) -> NetworkState {
    self.network.current_status()
  }

  pub fn subscribe_network_status<F>(&self, listener: F) -> Subscription
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    self.network.on_change(listener)
  }

  /// Cached records matching a secondary index, regardless of connectivity.
  pub fn cached_by_index(&self, index: ContentIndex, value: &str) -> Vec<ContentRecord> {
    self.cache.get_by_index(index, value)
  }

  /// Fetch a named collection.
  pub async fn fetch_collection(&self, name: &str) -> CycleOutcome {
    if !self.network.is_online() {
      debug!(collection = name, "Offline, reading local cache");
      return self.read_offline(name);
    }

    self.join_cycle(name).await
  }

  fn read_offline(&self, name: &str) -> CycleOutcome {
    let cached = self.cache.get_collection(name);
    if cached.records.is_empty() {
      info!(collection = name, "Offline with no cached content");
      return Err(SyncError::no_data(NoDataReason::Offline));
    }

    Ok(CollectionResult {
      last_updated: cached.last_updated(),
      data: cached.records,
      source: Source::Cache,
      degraded: false,
      error: None,
    })
  }

  /// Join the in-flight cycle for `name` or start one.
  fn join_cycle(&self, name: &str) -> Cycle {
    let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());

    if let Some(cycle) = in_flight.get(name) {
      debug!(collection = name, "Joining in-flight sync");
      return cycle.clone();
    }

    // Spawned while the map is locked, so the task's release of the entry
    // always runs after this insert.
    let this = self.clone();
    let key = name.to_string();
    let handle = tokio::spawn(async move {
      let _release = InFlightRelease {
        in_flight: Arc::clone(&this.in_flight),
        key: key.clone(),
      };
      this.run_cycle(&key).await
    });

    let cache = self.cache.clone();
    let key = name.to_string();
    let cycle = async move {
      match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
          warn!(collection = %key, "Sync task failed: {}", e);
          degrade(&cache, &key, format!("sync task failed: {}", e))
        }
      }
    }
    .boxed()
    .shared();

    in_flight.insert(name.to_string(), cycle.clone());
    cycle
  }

  async fn run_cycle(&self, name: &str) -> CycleOutcome {
    debug!(collection = name, "Fetching from remote");

    let fetched = match tokio::time::timeout(self.fetch_timeout, self.remote.fetch_collection(name))
      .await
    {
      Ok(Ok(records)) => Ok(records),
      Ok(Err(e)) => Err(format!("{:#}", e)),
      Err(_) => Err(format!("timed out after {:?}", self.fetch_timeout)),
    };

    match fetched {
      Ok(records) => {
        let synced_at = Utc::now();
        let error = match self.reconcile(name, &records, synced_at).await {
          Ok(removed) => {
            info!(
              collection = name,
              records = records.len(),
              removed,
              "Reconciled local cache"
            );
            None
          }
          Err(e) => {
            warn!(collection = name, "Keeping previous cache contents: {}", e);
            Some(e)
          }
        };

        Ok(CollectionResult {
          data: records,
          source: Source::Network,
          last_updated: Some(synced_at),
          degraded: false,
          error,
        })
      }
      Err(reason) => {
        warn!(collection = name, "Remote fetch failed: {}", reason);
        degrade(&self.cache, name, reason)
      }
    }
  }

  /// Replace the cached collection off the async workers.
  async fn reconcile(
    &self,
    name: &str,
    records: &[ContentRecord],
    synced_at: DateTime<Utc>,
  ) -> Result<usize, SyncError> {
    let cache = self.cache.clone();
    let name = name.to_string();
    let records = records.to_vec();

    tokio::task::spawn_blocking(move || cache.replace_collection(&name, &records, synced_at))
      .await
      .unwrap_or_else(|e| {
        Err(SyncError::PartialWriteFailure(format!(
          "cache write task failed: {}",
          e
        )))
      })
  }

  /// Fetch on behalf of a view; `on_result` runs only if `scope` is still
  /// active when the fetch settles. The cache update happens either way.
  pub fn fetch_for_view<F>(&self, scope: &ViewScope, name: &str, on_result: F) -> JoinHandle<()>
  where
    F: FnOnce(CycleOutcome) + Send + 'static,
  {
    let this = self.clone();
    let scope = scope.clone();
    let name = name.to_string();

    tokio::spawn(async move {
      let outcome = this.fetch_collection(&name).await;
      if scope.is_active() {
        on_result(outcome);
      } else {
        debug!(collection = %name, "View closed, discarding result");
      }
    })
  }

  /// Refetch `collections` every time connectivity comes back.
  pub fn spawn_reconnect_sync(&self, collections: Vec<String>) -> JoinHandle<()> {
    let this = self.clone();
    let mut changes = self.network.changes();

    tokio::spawn(async move {
      while changes.changed().await.is_ok() {
        let online = *changes.borrow_and_update();
        if !online {
          continue;
        }

        info!(collections = ?collections, "Connectivity restored, resyncing");
        let results =
          futures::future::join_all(collections.iter().map(|name| this.fetch_collection(name)))
            .await;

        for (name, result) in collections.iter().zip(results) {
          match result {
            Ok(r) => debug!(collection = %name, source = r.source.as_str(), "Resynced"),
            Err(e) => warn!(collection = %name, "Resync failed: {}", e),
          }
        }
      }
    })
  }
}

/// Online, but no fresh data: serve the cached collection flagged
/// degraded, or report that nothing is cached.
fn degrade(cache: &LocalCache, name: &str, reason: String) -> CycleOutcome {
  let cached = cache.get_collection(name);
  if cached.records.is_empty() {
    return Err(SyncError::no_data(NoDataReason::RemoteUnreachable));
  }

  Ok(CollectionResult {
    last_updated: cached.last_updated(),
    data: cached.records,
    source: Source::StaleCache,
    degraded: true,
    error: Some(SyncError::RemoteFetchFailed(reason)),
  })
}

/// Drops the in-flight entry when a cycle task ends, including by panic
/// or abort.
struct InFlightRelease {
  in_flight: Arc<Mutex<HashMap<String, Cycle>>>,
  key: String,
}

impl Drop for InFlightRelease {
  fn drop(&mut self) {
    self
      .in_flight
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(&self.key);
  }
}

impl<R: RemoteSource> Clone for SyncOrchestrator<R> {
  fn clone(&self) -> Self {
    Self {
      remote: Arc::clone(&self.remote),
      cache: self.cache.clone(),
      network: self.network.clone(),
      resources: self.resources.clone(),
      site: self.site.clone(),
      fetch_timeout: self.fetch_timeout,
      in_flight: Arc::clone(&self.in_flight),
    }
  }
}
