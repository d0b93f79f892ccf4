pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod network;
pub mod remote;
pub mod resource;
pub mod store;
pub mod sync;

pub use error::{NoDataReason, SyncError};
pub use model::{ContentRecord, NetworkState, PageSnapshotRecord};
pub use sync::{CollectionResult, PageResult, Source, SyncOrchestrator, ViewScope};
