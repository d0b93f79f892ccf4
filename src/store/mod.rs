//! Structured local cache for content records and page snapshots.
//!
//! - `ContentStore` is the storage contract, with SQLite and in-memory backends
//! - `LocalCache` contains storage failures so callers degrade to network-only
//! - `SharedCache` opens the store once per process

mod cache;
mod memory;
mod shared;
mod sqlite;
mod traits;

pub use cache::{CachedCollection, LocalCache};
pub use memory::MemoryStore;
pub use shared::SharedCache;
pub use sqlite::{SqliteStore, SCHEMA_VERSION};
pub use traits::{ContentIndex, ContentStore};
