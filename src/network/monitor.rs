//! Connectivity state with transition notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::info;

use crate::model::NetworkState;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct Inner {
  state: watch::Sender<bool>,
  listeners: Mutex<HashMap<u64, Listener>>,
  next_id: AtomicU64,
}

impl Inner {
  fn listeners(&self) -> MutexGuard<'_, HashMap<u64, Listener>> {
    // Listeners run outside the lock, so a poisoned map is still consistent.
    self.listeners.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Process-wide network status.
///
/// Platform signals (the HTTP probe, or a test) report connectivity through
/// [`NetworkMonitor::set_online`]. Only real transitions reach listeners.
/// Clones share the same state.
#[derive(Clone)]
pub struct NetworkMonitor {
  inner: Arc<Inner>,
}

impl NetworkMonitor {
  /// Create a monitor seeded with the platform's current connectivity flag.
  pub fn new(is_online: bool) -> Self {
    let (state, _) = watch::channel(is_online);
    Self {
      inner: Arc::new(Inner {
        state,
        listeners: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(0),
      }),
    }
  }

  pub fn current_status(&self) -> NetworkState {
    NetworkState {
      is_online: self.is_online(),
    }
  }

  pub fn is_online(&self) -> bool {
    *self.inner.state.borrow()
  }

  /// Report the platform's connectivity. Returns true if this was a transition.
  pub fn set_online(&self, is_online: bool) -> bool {
    let changed = self.inner.state.send_if_modified(|current| {
      if *current == is_online {
        false
      } else {
        *current = is_online;
        true
      }
    });

    if changed {
      info!(is_online, "Network status changed");
      let listeners: Vec<Listener> = self.inner.listeners().values().cloned().collect();
      for listener in listeners {
        listener(is_online);
      }
    }

    changed
  }

  /// Register a listener invoked with the new state on every transition.
  ///
  /// The listener is removed when the returned [`Subscription`] is dropped
  /// or explicitly unsubscribed.
  pub fn on_change<F>(&self, listener: F) -> Subscription
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    self.inner.listeners().insert(id, Arc::new(listener));

    Subscription {
      monitor: Arc::downgrade(&self.inner),
      id,
    }
  }

  /// Async view of the state for tasks that await transitions.
  pub fn changes(&self) -> watch::Receiver<bool> {
    self.inner.state.subscribe()
  }

  #[cfg(test)]
  fn listener_count(&self) -> usize {
    self.inner.listeners().len()
  }
}

/// Handle to a registered listener.
pub struct Subscription {
  monitor: Weak<Inner>,
  id: u64,
}

impl Subscription {
  /// Remove the listener. Safe to call repeatedly and after the monitor is gone.
  pub fn unsubscribe(&self) {
    if let Some(inner) = self.monitor.upgrade() {
      inner.listeners().remove(&self.id);
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}
