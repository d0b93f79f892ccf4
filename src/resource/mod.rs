//! Resource snapshot cache and its eviction policy.
//!
//! The synchronization core only reads from here: whether a URL has a
//! cached response, and that response's date for freshness display.

mod policy;
mod snapshot;

pub use policy::{CachePolicy, PrecacheEntry, PrecacheManifest, RuntimeRule, Strategy};
pub use snapshot::{
  content_revision, normalize_url, CachedResponse, Fetched, ResourceCache, ResourceSnapshots,
};
