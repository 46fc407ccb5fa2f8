//! Core types for the versioned cache store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Identity of a cacheable request: method plus absolute URL.
///
/// Only read-only retrievals (GET) are cacheable, so the constructor pins
/// the method. Two identities are equal iff method and URL are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
  method: &'static str,
  url: Url,
}

impl RequestIdentity {
  /// Create the identity for a GET request to `url`.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET",
      url,
    }
  }

  pub fn method(&self) -> &str {
    self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// URL path component, used for eviction-policy prefix matching.
  pub fn path(&self) -> &str {
    self.url.path()
  }

  /// Stable fixed-length storage key for this identity.
  pub fn storage_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Captured body, status and headers of a retrieval, plus capture time.
///
/// Immutable once stored; a later write for the same identity replaces it
/// wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub captured_at: DateTime<Utc>,
}

impl StoredResponse {
  /// Build a response captured now.
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
      captured_at: Utc::now(),
    }
  }

  /// Whether the status indicates success (2xx). Only successful responses
  /// are ever persisted into a generation.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Metadata for one stored entry, as enumerated by the sweeper.
#[derive(Debug, Clone)]
pub struct CacheEntryMeta {
  pub identity: RequestIdentity,
  pub captured_at: DateTime<Utc>,
}

/// Summary of one generation, as reported for GET_CACHE_INFO.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInfo {
  pub item_count: usize,
  pub items: Vec<String>,
}
