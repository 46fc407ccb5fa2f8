//! HTTP client wrapper for asset fetches and the version endpoint.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use url::Url;

use crate::store::StoredResponse;

/// Payload of `GET /api/version`.
#[derive(Debug, Deserialize)]
struct VersionResponse {
  version: String,
}

/// Thin reqwest wrapper bound to the application origin.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
  origin: Url,
}

impl HttpClient {
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  /// Absolute URL for a root-relative path.
  pub fn url_for(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid asset path '{}': {}", path, e))
  }

  /// GET a URL and capture status, headers and body.
  ///
  /// Non-success statuses are captured, not errors; the caller decides
  /// whether the response is persistable.
  pub async fn fetch_url(&self, url: &Url) -> Result<StoredResponse> {
    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
      .to_vec();

    Ok(StoredResponse::new(status, headers, body))
  }

  /// GET a root-relative path on the origin.
  pub async fn fetch_path(&self, path: &str) -> Result<StoredResponse> {
    let url = self.url_for(path)?;
    self.fetch_url(&url).await
  }

  /// Fetch the deployed version from `/api/version`, bypassing caches.
  ///
  /// Non-success statuses and malformed payloads are errors here; the update
  /// checker treats them as an inconclusive check.
  pub async fn fetch_version(&self) -> Result<String> {
    let url = self.url_for("/api/version")?;

    let response = self
      .client
      .get(url.clone())
      .header(reqwest::header::CACHE_CONTROL, "no-cache")
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch version endpoint: {}", e))?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Version endpoint returned {}",
        response.status().as_u16()
      ));
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read version payload: {}", e))?;

    parse_version_payload(&body)
  }
}

/// Parse the version endpoint payload.
fn parse_version_payload(body: &[u8]) -> Result<String> {
  let payload: VersionResponse = serde_json::from_slice(body)
    .map_err(|e| eyre!("Malformed version payload: {}", e))?;
  Ok(payload.version)
}
