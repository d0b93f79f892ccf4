//! HTTP reachability probe standing in for the platform connectivity signal.

use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::NetworkMonitor;

/// Polls a health endpoint and reports the outcome to a [`NetworkMonitor`].
#[derive(Clone)]
pub struct HttpProbe {
  client: reqwest::Client,
  url: Url,
}

impl HttpProbe {
  pub fn new(base_url: &str, health_path: &str, timeout: Duration) -> Result<Self> {
    let url = Url::parse(base_url)
      .and_then(|base| base.join(health_path))
      .map_err(|e| eyre!("Invalid health check URL {}{}: {}", base_url, health_path, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client, url })
  }

  /// One reachability check. Any transport error or non-2xx status is offline.
  pub async fn check(&self) -> bool {
    match self.client.get(self.url.clone()).send().await {
      Ok(resp) => resp.status().is_success(),
      Err(e) => {
        debug!(url = %self.url, "Health check failed: {}", e);
        false
      }
    }
  }

  /// Probe once now, then every `interval`, feeding results to `monitor`.
  pub fn spawn(self, monitor: NetworkMonitor, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let online = self.check().await;
        monitor.set_online(online);
      }
    })
  }
}
