//! URL-keyed cache of whole HTTP responses (pages and assets).

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use url::Url;

use super::policy::{CachePolicy, PrecacheManifest, RuntimeRule, Strategy};

/// A stored HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub url: String,
  pub status: u16,
  /// Header names are lowercase
  pub headers: BTreeMap<String, String>,
  pub body: String,
}

impl CachedResponse {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Response time from the `Date` header, else `Last-Modified`.
  pub fn date(&self) -> Option<DateTime<Utc>> {
    ["date", "last-modified"]
      .iter()
      .find_map(|name| self.header(name).and_then(parse_http_date))
  }
}

/// HTTP-date ("Sun, 06 Nov 1994 08:49:37 GMT") is an RFC 2822 subset.
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc2822(value.trim())
    .ok()
    .map(|dt| dt.with_timezone(&Utc))
}

/// Revision recorded for precache entries that do not declare one.
pub fn content_revision(body: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body.as_bytes());
  hex::encode(hasher.finalize())
}

/// Cache key: absolute URL without fragment.
pub fn normalize_url(url: &str) -> Result<String> {
  let mut parsed = Url::parse(url).map_err(|e| eyre!("Invalid resource URL '{}': {}", url, e))?;
  parsed.set_fragment(None);
  Ok(parsed.to_string())
}

/// Read-only view of the resource cache used by the synchronization core.
pub trait ResourceSnapshots: Send + Sync {
  fn lookup(&self, url: &str) -> Option<CachedResponse>;

  /// Every URL with a live entry.
  fn cached_urls(&self) -> Vec<String>;

  fn has_cached(&self, url: &str) -> bool {
    self.lookup(url).is_some()
  }

  /// Date of the cached response for `url`, if any.
  fn last_updated(&self, url: &str) -> Option<DateTime<Utc>> {
    self.lookup(url).and_then(|r| r.date())
  }
}

/// Outcome of a fetch routed through the cache.
#[derive(Debug, Clone)]
pub struct Fetched {
  pub response: CachedResponse,
  pub from_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
  response: CachedResponse,
  stored_at: DateTime<Utc>,
  revision: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ResourceState {
  precache_revision: Option<String>,
  precache: HashMap<String, StoredEntry>,
  /// cache name -> url -> entry
  runtime: HashMap<String, HashMap<String, StoredEntry>>,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Precache plus named runtime caches, governed by a [`CachePolicy`].
///
/// Any entry may be missing at any time; nothing here promises that a
/// response survives between sessions.
pub struct ResourceCache {
  rules: Vec<(RuntimeRule, Regex)>,
  state: Mutex<ResourceState>,
  clock: Clock,
}

impl ResourceCache {
  pub fn new(policy: &CachePolicy) -> Result<Self> {
    let rules = policy
      .runtime
      .iter()
      .map(|rule| Ok((rule.clone(), rule.compile()?)))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      rules,
      state: Mutex::new(ResourceState::default()),
      clock: Arc::new(Utc::now),
    })
  }

  /// Replace the time source.
  pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  /// Restore a cache saved with [`ResourceCache::save`]. A missing or
  /// unreadable file gives an empty cache.
  pub fn load(policy: &CachePolicy, path: &Path) -> Result<Self> {
    let cache = Self::new(policy)?;
    match std::fs::read(path) {
      Ok(bytes) => match serde_json::from_slice::<ResourceState>(&bytes) {
        Ok(state) => *cache.state()? = state,
        Err(e) => warn!(path = %path.display(), "Discarding unreadable resource cache: {}", e),
      },
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => warn!(path = %path.display(), "Could not read resource cache: {}", e),
    }
    Ok(cache)
  }

  pub fn save(&self, path: &Path) -> Result<()> {
    let data = {
      let state = self.state()?;
      serde_json::to_vec(&*state).map_err(|e| eyre!("Failed to serialize resource cache: {}", e))?
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }
    std::fs::write(path, data)
      .map_err(|e| eyre!("Failed to write resource cache {}: {}", path.display(), e))?;
    Ok(())
  }

  fn state(&self) -> Result<MutexGuard<'_, ResourceState>> {
    self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn now(&self) -> DateTime<Utc> {
    (self.clock)()
  }

  /// Populate the precache from `manifest`.
  ///
  /// A manifest whose revision is already installed is a no-op. Otherwise
  /// the new set is fetched completely before it replaces the old one;
  /// entries whose declared revision is unchanged are carried over without
  /// a fetch. Returns the number of fetched entries.
  pub async fn install_precache<F, Fut>(&self, manifest: &PrecacheManifest, fetch: F) -> Result<usize>
  where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let previous = {
      let state = self.state()?;
      if state.precache_revision.as_deref() == Some(manifest.revision.as_str()) {
        debug!(revision = %manifest.revision, "Precache already installed");
        return Ok(0);
      }
      state.precache.clone()
    };

    let mut next = HashMap::with_capacity(manifest.entries.len());
    let mut fetched = 0;

    for entry in &manifest.entries {
      let key = normalize_url(&entry.url)?;

      if let (Some(revision), Some(old)) = (&entry.revision, previous.get(&key)) {
        if old.revision.as_ref() == Some(revision) {
          next.insert(key, old.clone());
          continue;
        }
      }

      let response = fetch(key.clone()).await?;
      if !response.is_success() {
        return Err(eyre!(
          "Precache fetch for {} returned status {}",
          key,
          response.status
        ));
      }

      let revision = entry
        .revision
        .clone()
        .unwrap_or_else(|| content_revision(&response.body));
      next.insert(
        key,
        StoredEntry {
          response,
          stored_at: self.now(),
          revision: Some(revision),
        },
      );
      fetched += 1;
    }

    let mut state = self.state()?;
    state.precache = next;
    state.precache_revision = Some(manifest.revision.clone());
    info!(
      revision = %manifest.revision,
      entries = state.precache.len(),
      fetched,
      "Installed precache"
    );

    Ok(fetched)
  }

  fn rule_for(&self, url: &str) -> Option<&RuntimeRule> {
    self
      .rules
      .iter()
      .find(|(_, pattern)| pattern.is_match(url))
      .map(|(rule, _)| rule)
  }

  fn precached(&self, key: &str) -> Option<CachedResponse> {
    let state = self.state().ok()?;
    state.precache.get(key).map(|e| e.response.clone())
  }

  fn is_expired(&self, rule: &RuntimeRule, entry: &StoredEntry, now: DateTime<Utc>) -> bool {
    now - entry.stored_at >= rule.max_age()
  }

  /// Live runtime entry for `key`; an expired one is purged.
  fn runtime_lookup(&self, rule: &RuntimeRule, key: &str) -> Option<CachedResponse> {
    let now = self.now();
    let mut state = self.state().ok()?;
    let bucket = state.runtime.get_mut(&rule.cache_name)?;
    let entry = bucket.get(key)?;

    if self.is_expired(rule, entry, now) {
      debug!(cache = %rule.cache_name, url = key, "Dropping expired entry");
      bucket.remove(key);
      return None;
    }

    Some(entry.response.clone())
  }

  fn store_runtime(&self, rule: &RuntimeRule, key: &str, response: &CachedResponse) {
    let now = self.now();
    let Ok(mut state) = self.state() else {
      return;
    };
    let bucket = state.runtime.entry(rule.cache_name.clone()).or_default();

    bucket.insert(
      key.to_string(),
      StoredEntry {
        response: response.clone(),
        stored_at: now,
        revision: None,
      },
    );

    bucket.retain(|_, entry| now - entry.stored_at < rule.max_age());

    while bucket.len() > rule.max_entries {
      let oldest = bucket
        .iter()
        .min_by_key(|(_, entry)| entry.stored_at)
        .map(|(url, _)| url.clone());
      match oldest {
        Some(url) => {
          debug!(cache = %rule.cache_name, url = %url, "Evicting oldest entry");
          bucket.remove(&url);
        }
        None => break,
      }
    }
  }

  /// Route a request through the cache.
  ///
  /// Precached URLs are served from the precache. Other URLs follow the
  /// strategy of the first matching runtime rule; URLs matching no rule go
  /// straight to `network` and are not stored.
  pub async fn fetch<F, Fut>(&self, url: &str, network: F) -> Result<Fetched>
  where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let key = normalize_url(url)?;

    if let Some(response) = self.precached(&key) {
      return Ok(Fetched {
        response,
        from_cache: true,
      });
    }

    let Some(rule) = self.rule_for(&key) else {
      let response = network(key).await?;
      return Ok(Fetched {
        response,
        from_cache: false,
      });
    };

    match rule.strategy {
      Strategy::NetworkOnly => {
        let response = network(key).await?;
        Ok(Fetched {
          response,
          from_cache: false,
        })
      }
      Strategy::CacheFirst => {
        if let Some(response) = self.runtime_lookup(rule, &key) {
          return Ok(Fetched {
            response,
            from_cache: true,
          });
        }
        let response = network(key.clone()).await?;
        if response.is_success() {
          self.store_runtime(rule, &key, &response);
        }
        Ok(Fetched {
          response,
          from_cache: false,
        })
      }
      Strategy::NetworkFirst => {
        let timeout = rule.network_timeout();
        let failure = match tokio::time::timeout(timeout, network(key.clone())).await {
          Ok(Ok(response)) if response.is_success() => {
            self.store_runtime(rule, &key, &response);
            return Ok(Fetched {
              response,
              from_cache: false,
            });
          }
          Ok(Ok(response)) => {
            if let Some(cached) = self.runtime_lookup(rule, &key) {
              return Ok(Fetched {
                response: cached,
                from_cache: true,
              });
            }
            return Ok(Fetched {
              response,
              from_cache: false,
            });
          }
          Ok(Err(e)) => e,
          Err(_) => eyre!("Request for {} timed out after {:?}", key, timeout),
        };

        match self.runtime_lookup(rule, &key) {
          Some(response) => {
            debug!(url = %key, "Network failed, serving cached response: {:#}", failure);
            Ok(Fetched {
              response,
              from_cache: true,
            })
          }
          None => Err(failure),
        }
      }
    }
  }
}

impl ResourceSnapshots for ResourceCache {
  fn lookup(&self, url: &str) -> Option<CachedResponse> {
    let key = normalize_url(url).ok()?;
    if let Some(response) = self.precached(&key) {
      return Some(response);
    }

    self
      .rules
      .iter()
      .find_map(|(rule, _)| self.runtime_lookup(rule, &key))
  }

  fn cached_urls(&self) -> Vec<String> {
    let now = self.now();
    let Ok(state) = self.state() else {
      return Vec::new();
    };

    let mut urls: BTreeSet<String> = state.precache.keys().cloned().collect();
    for (rule, _) in &self.rules {
      if let Some(bucket) = state.runtime.get(&rule.cache_name) {
        urls.extend(
          bucket
            .iter()
            .filter(|(_, entry)| !self.is_expired(rule, entry, now))
            .map(|(url, _)| url.clone()),
        );
      }
    }

    urls.into_iter().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resource::policy::PrecacheEntry;
  use chrono::TimeZone;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  const BASE: &str = "https://portal.example.org";

  fn url(path: &str) -> String {
    format!("{}{}", BASE, path)
  }

  fn policy(strategy: Strategy, max_entries: usize) -> CachePolicy {
    CachePolicy {
      precache: PrecacheManifest::default(),
      runtime: vec![RuntimeRule {
        cache_name: "api".to_string(),
        url_pattern: "^https://portal\\.example\\.org/".to_string(),
        strategy,
        network_timeout_secs: 1,
        max_entries,
        max_age_secs: 3600,
      }],
    }
  }

  /// Cache with a manually advanced clock.
  fn cache_with_clock(policy: &CachePolicy) -> (ResourceCache, Arc<Mutex<DateTime<Utc>>>) {
    let now = Arc::new(Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
    let clock = Arc::clone(&now);
    let cache = ResourceCache::new(policy)
      .unwrap()
      .with_clock(move || *clock.lock().unwrap());
    (cache, now)
  }

  fn advance(now: &Mutex<DateTime<Utc>>, by: chrono::Duration) {
    let mut guard = now.lock().unwrap();
    *guard = *guard + by;
  }

  async fn ok(url: String) -> Result<CachedResponse> {
    Ok(CachedResponse::new(url.clone(), 200, format!("body of {}", url)))
  }

  async fn down(_url: String) -> Result<CachedResponse> {
    Err(eyre!("connection refused"))
  }

  #[test]
  fn test_date_header_parsing() {
    let dated = CachedResponse::new(url("/"), 200, "")
      .with_header("Date", "Wed, 01 May 2024 10:00:00 GMT")
      .with_header("Last-Modified", "Tue, 30 Apr 2024 10:00:00 GMT");
    assert_eq!(
      dated.date(),
      Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
    );

    let modified_only = CachedResponse::new(url("/"), 200, "")
      .with_header("Last-Modified", "Tue, 30 Apr 2024 10:00:00 GMT");
    assert_eq!(
      modified_only.date(),
      Some(Utc.with_ymd_and_hms(2024, 4, 30, 10, 0, 0).unwrap())
    );

    let garbage = CachedResponse::new(url("/"), 200, "").with_header("Date", "yesterday");
    assert_eq!(garbage.date(), None);
  }

  #[test]
  fn test_normalize_strips_fragment() {
    assert_eq!(
      normalize_url("https://portal.example.org/map#layer").unwrap(),
      "https://portal.example.org/map"
    );
    assert!(normalize_url("/relative").is_err());
  }

  #[tokio::test]
  async fn test_network_first_stores_then_falls_back() {
    let cache = ResourceCache::new(&policy(Strategy::NetworkFirst, 10)).unwrap();

    let first = cache.fetch(&url("/api/warnings"), ok).await.unwrap();
    assert!(!first.from_cache);

    let second = cache.fetch(&url("/api/warnings"), down).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.response, first.response);

    assert!(cache.fetch(&url("/api/other"), down).await.is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_network_first_abandons_slow_network() {
    let cache = ResourceCache::new(&policy(Strategy::NetworkFirst, 10)).unwrap();
    cache.fetch(&url("/api/disasters"), ok).await.unwrap();

    let slow = |u: String| async move {
      tokio::time::sleep(Duration::from_secs(30)).await;
      ok(u).await
    };
    let result = cache.fetch(&url("/api/disasters"), slow).await.unwrap();
    assert!(result.from_cache);
  }

  #[tokio::test]
  async fn test_server_error_prefers_cached_copy() {
    let cache = ResourceCache::new(&policy(Strategy::NetworkFirst, 10)).unwrap();
    cache.fetch(&url("/api/warnings"), ok).await.unwrap();

    let failing = |u: String| async move { Ok(CachedResponse::new(u, 502, "bad gateway")) };
    let result = cache.fetch(&url("/api/warnings"), failing).await.unwrap();
    assert!(result.from_cache);
    assert_eq!(result.response.status, 200);
  }

  #[tokio::test]
  async fn test_cache_first_skips_network_on_hit() {
    let cache = ResourceCache::new(&policy(Strategy::CacheFirst, 10)).unwrap();
    let calls = AtomicUsize::new(0);
    let counting = |u: String| {
      calls.fetch_add(1, Ordering::SeqCst);
      ok(u)
    };

    cache.fetch(&url("/logo.png"), counting).await.unwrap();
    let hit = cache.fetch(&url("/logo.png"), counting).await.unwrap();

    assert!(hit.from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_network_only_never_stores() {
    let cache = ResourceCache::new(&policy(Strategy::NetworkOnly, 10)).unwrap();
    cache.fetch(&url("/api/live"), ok).await.unwrap();
    assert!(!cache.has_cached(&url("/api/live")));
  }

  #[tokio::test]
  async fn test_max_entries_evicts_oldest() {
    let (cache, now) = cache_with_clock(&policy(Strategy::NetworkFirst, 2));

    for path in ["/a", "/b", "/c"] {
      cache.fetch(&url(path), ok).await.unwrap();
      advance(&now, chrono::Duration::seconds(1));
    }

    assert_eq!(cache.cached_urls(), vec![url("/b"), url("/c")]);
  }

  #[tokio::test]
  async fn test_expired_entries_are_absent() {
    let (cache, now) = cache_with_clock(&policy(Strategy::NetworkFirst, 10));
    cache.fetch(&url("/api/warnings"), ok).await.unwrap();
    assert!(cache.has_cached(&url("/api/warnings")));

    advance(&now, chrono::Duration::hours(2));

    assert!(cache.cached_urls().is_empty());
    assert!(!cache.has_cached(&url("/api/warnings")));
    assert!(cache.fetch(&url("/api/warnings"), down).await.is_err());
  }

  #[tokio::test]
  async fn test_unbounded_max_age_never_expires() {
    let mut policy = policy(Strategy::NetworkFirst, 10);
    policy.runtime[0].max_age_secs = u64::MAX;
    let (cache, now) = cache_with_clock(&policy);
    cache.fetch(&url("/api/warnings"), ok).await.unwrap();

    advance(&now, chrono::Duration::days(3650));

    assert!(cache.has_cached(&url("/api/warnings")));
    cache.fetch(&url("/api/shelters"), ok).await.unwrap();
    assert_eq!(cache.cached_urls().len(), 2);
  }

  #[tokio::test]
  async fn test_unmatched_urls_bypass_cache() {
    let cache = ResourceCache::new(&policy(Strategy::NetworkFirst, 10)).unwrap();
    cache.fetch("https://tiles.elsewhere.net/1/2/3.png", ok).await.unwrap();
    assert!(cache.cached_urls().is_empty());
  }

  #[tokio::test]
  async fn test_precache_install_and_revision_replacement() {
    let (cache, now) = cache_with_clock(&policy(Strategy::NetworkFirst, 10));
    let manifest = PrecacheManifest {
      revision: "build-1".to_string(),
      entries: vec![
        PrecacheEntry {
          url: url("/"),
          revision: None,
        },
        PrecacheEntry {
          url: url("/app.js"),
          revision: Some("js-1".to_string()),
        },
      ],
    };

    assert_eq!(cache.install_precache(&manifest, ok).await.unwrap(), 2);
    assert_eq!(cache.install_precache(&manifest, ok).await.unwrap(), 0);

    // Precache never expires.
    advance(&now, chrono::Duration::days(30));
    assert!(cache.has_cached(&url("/")));

    let next = PrecacheManifest {
      revision: "build-2".to_string(),
      entries: vec![PrecacheEntry {
        url: url("/app.js"),
        revision: Some("js-1".to_string()),
      }],
    };
    assert_eq!(cache.install_precache(&next, down).await.unwrap(), 0);
    assert_eq!(cache.cached_urls(), vec![url("/app.js")]);
  }

  #[tokio::test]
  async fn test_failed_precache_install_keeps_previous_set() {
    let cache = ResourceCache::new(&policy(Strategy::NetworkFirst, 10)).unwrap();
    let first = PrecacheManifest {
      revision: "build-1".to_string(),
      entries: vec![PrecacheEntry {
        url: url("/"),
        revision: None,
      }],
    };
    cache.install_precache(&first, ok).await.unwrap();

    let second = PrecacheManifest {
      revision: "build-2".to_string(),
      entries: vec![PrecacheEntry {
        url: url("/offline"),
        revision: None,
      }],
    };
    assert!(cache.install_precache(&second, down).await.is_err());
    assert_eq!(cache.cached_urls(), vec![url("/")]);
  }

  #[tokio::test]
  async fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resources.json");
    let policy = policy(Strategy::NetworkFirst, 10);

    let cache = ResourceCache::new(&policy).unwrap();
    cache.fetch(&url("/api/warnings"), ok).await.unwrap();
    cache.save(&path).unwrap();

    let restored = ResourceCache::load(&policy, &path).unwrap();
    assert!(restored.has_cached(&url("/api/warnings")));

    let missing = ResourceCache::load(&policy, &dir.path().join("none.json")).unwrap();
    assert!(missing.cached_urls().is_empty());
  }

  #[test]
  fn test_content_revision_is_stable_hash() {
    assert_eq!(content_revision("a"), content_revision("a"));
    assert_ne!(content_revision("a"), content_revision("b"));
    assert_eq!(content_revision("").len(), 64);
  }
}
