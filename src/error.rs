//! Error taxonomy surfaced by the synchronization subsystem.

use serde::Serialize;

/// Why no data could be produced for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoDataReason {
  /// Offline and nothing was ever cached here
  Offline,
  /// Online, the remote failed, and the cache is empty
  RemoteUnreachable,
}

impl NoDataReason {
  /// Stable code for UI consumers.
  pub fn code(self) -> &'static str {
    match self {
      Self::Offline => "offline-no-cache",
      Self::RemoteUnreachable => "remote-unreachable-no-cache",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
  /// Local store could not be opened or used. Non-fatal.
  #[error("local cache unavailable: {0}")]
  StoreUnavailable(String),

  /// Remote call failed or timed out while online.
  #[error("remote fetch failed: {0}")]
  RemoteFetchFailed(String),

  #[error("{}", no_data_message(.reason))]
  NoCachedData { reason: NoDataReason },

  /// A reconciliation batch was rolled back; previous cache contents are intact.
  #[error("cache write rolled back: {0}")]
  PartialWriteFailure(String),
}

fn no_data_message(reason: &NoDataReason) -> &'static str {
  match reason {
    NoDataReason::Offline => "no cached content available offline",
    NoDataReason::RemoteUnreachable => "could not reach the server and no cached content exists",
  }
}

impl SyncError {
  pub fn no_data(reason: NoDataReason) -> Self {
    Self::NoCachedData { reason }
  }

  /// Reason code when this is a `NoCachedData` error.
  pub fn no_data_reason(&self) -> Option<NoDataReason> {
    match self {
      Self::NoCachedData { reason } => Some(*reason),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_no_data_errors_are_distinguishable() {
    let offline = SyncError::no_data(NoDataReason::Offline);
    let unreachable = SyncError::no_data(NoDataReason::RemoteUnreachable);

    assert_ne!(offline, unreachable);
    assert_ne!(offline.to_string(), unreachable.to_string());
    assert_eq!(offline.no_data_reason().map(|r| r.code()), Some("offline-no-cache"));
    assert_eq!(
      unreachable.no_data_reason().map(|r| r.code()),
      Some("remote-unreachable-no-cache")
    );
  }

  #[test]
  fn test_other_errors_have_no_reason() {
    assert_eq!(
      SyncError::RemoteFetchFailed("timeout".into()).no_data_reason(),
      None
    );
  }
}
