use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness marker for a consuming view.
///
/// Results for a closed scope are dropped instead of delivered. Clones
/// share the same flag.
#[derive(Clone, Debug)]
pub struct ViewScope {
  active: Arc<AtomicBool>,
}

impl ViewScope {
  pub fn new() -> Self {
    Self {
      active: Arc::new(AtomicBool::new(true)),
    }
  }

  /// Mark the view as torn down. Idempotent.
  pub fn close(&self) {
    self.active.store(false, Ordering::SeqCst);
  }

  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::SeqCst)
  }
}

impl Default for ViewScope {
  fn default() -> Self {
    Self::new()
  }
}
