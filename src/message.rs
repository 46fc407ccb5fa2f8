//! Typed control messages exchanged with clients.
//!
//! The wire shape is the tagged-object form clients already speak:
//! `{"type": "SKIP_WAITING"}`, `{"type": "CACHE_INFO", "data": {...}}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::GenerationInfo;

/// Control messages accepted by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Promote a pending generation immediately
  SkipWaiting,
  /// Run an update check now
  CheckUpdates,
  /// Delete every generation
  ClearCache,
  /// Report per-generation entry counts and URLs
  GetCacheInfo,
}

/// Replies to control messages. `SkipWaiting` has no reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
  #[serde(rename_all = "camelCase")]
  UpdatesChecked {
    update_available: bool,
    pending_version: Option<String>,
  },
  CacheCleared,
  CacheInfo {
    data: BTreeMap<String, GenerationInfo>,
  },
}
