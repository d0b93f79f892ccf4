//! Scripted remote for orchestrator tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::model::ContentRecord;
use crate::remote::RemoteSource;

/// Response for one `fetch_collection` call, consumed in order.
pub enum Step {
  Records(Vec<ContentRecord>),
  Delayed(Duration, Vec<ContentRecord>),
  Fail,
  Hang,
  Panic,
}

pub struct ScriptedRemote {
  steps: Mutex<VecDeque<Step>>,
  calls: AtomicUsize,
  pages: Mutex<HashMap<String, String>>,
}

impl ScriptedRemote {
  pub fn new(steps: Vec<Step>) -> Self {
    Self {
      steps: Mutex::new(steps.into()),
      calls: AtomicUsize::new(0),
      pages: Mutex::new(HashMap::new()),
    }
  }

  pub fn with_page(self, path: &str, content: &str) -> Self {
    self
      .pages
      .lock()
      .unwrap()
      .insert(path.to_string(), content.to_string());
    self
  }

  pub fn remove_page(&self, path: &str) {
    self.pages.lock().unwrap().remove(path);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl RemoteSource for ScriptedRemote {
  fn fetch_collection(&self, _name: &str) -> impl Future<Output = Result<Vec<ContentRecord>>> + Send {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Fail);

    async move {
      match step {
        Step::Records(records) => Ok(records),
        Step::Delayed(delay, records) => {
          tokio::time::sleep(delay).await;
          Ok(records)
        }
        Step::Fail => Err(eyre!("503 Service Unavailable")),
        Step::Hang => std::future::pending().await,
        Step::Panic => panic!("remote client panicked"),
      }
    }
  }

  fn render_page(&self, path: &str) -> impl Future<Output = Result<String>> + Send {
    let page = self.pages.lock().unwrap().get(path).cloned();
    let path = path.to_string();

    async move { page.ok_or_else(|| eyre!("Failed to render page {}", path)) }
  }
}
