use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use url::Url;

use super::RemoteSource;
use crate::config::RemoteConfig;
use crate::model::ContentRecord;
use crate::resource::CachedResponse;

/// HTTP client for the portal's content API.
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base: Url,
}

impl HttpRemote {
  pub fn new(config: &RemoteConfig) -> Result<Self> {
    let base = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid remote base URL '{}': {}", config.base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(config.fetch_timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  /// Absolute URL of a page path.
  pub fn page_url(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid page path '{}': {}", path, e))
  }

  fn collection_url(&self, name: &str) -> Result<Url> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("Remote base URL cannot have a path: {}", self.base))?
      .pop_if_empty()
      .push("collections")
      .push(name);
    Ok(url)
  }

  /// Get every item in a collection
  pub async fn fetch_collection(&self, name: &str) -> Result<Vec<ContentRecord>> {
    let url = self.collection_url(name)?;

    let records = self
      .client
      .get(url)
      .send()
      .await
      .and_then(|resp| resp.error_for_status())
      .map_err(|e| eyre!("Failed to fetch collection {}: {}", name, e))?
      .json::<Vec<ContentRecord>>()
      .await
      .map_err(|e| eyre!("Failed to parse collection {}: {}", name, e))?;

    Ok(records)
  }

  /// Get the rendered payload of a page
  pub async fn render_page(&self, path: &str) -> Result<String> {
    let url = self.page_url(path)?;

    self
      .client
      .get(url)
      .send()
      .await
      .and_then(|resp| resp.error_for_status())
      .map_err(|e| eyre!("Failed to render page {}: {}", path, e))?
      .text()
      .await
      .map_err(|e| eyre!("Failed to read page {}: {}", path, e))
  }

  /// Fetch a URL as a cacheable response, keeping status and headers.
  pub async fn fetch_resource(&self, url: String) -> Result<CachedResponse> {
    let resp = self
      .client
      .get(&url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = resp.status().as_u16();
    let headers: BTreeMap<String, String> = resp
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = resp
      .text()
      .await
      .map_err(|e| eyre!("Failed to read {}: {}", url, e))?;

    Ok(CachedResponse {
      url,
      status,
      headers,
      body,
    })
  }
}

impl RemoteSource for HttpRemote {
  async fn fetch_collection(&self, name: &str) -> Result<Vec<ContentRecord>> {
    HttpRemote::fetch_collection(self, name).await
  }

  async fn render_page(&self, path: &str) -> Result<String> {
    HttpRemote::render_page(self, path).await
  }
}
