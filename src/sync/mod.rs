//! Synchronization core: decides between network and cache per request
//! and reconciles the local cache with remote data.

mod orchestrator;
mod pages;
mod result;
mod scope;
#[cfg(test)]
mod testing;

pub use orchestrator::{CycleOutcome, SyncOrchestrator};
pub use result::{CollectionResult, PageResult, Source};
pub use scope::ViewScope;
