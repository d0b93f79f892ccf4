//! Network status monitoring.

mod monitor;
mod probe;

pub use monitor::{NetworkMonitor, Subscription};
pub use probe::HttpProbe;
