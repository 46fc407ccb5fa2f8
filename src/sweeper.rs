//! Periodic eviction of expired cache entries.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::store::CacheStore;

/// TTL tiers keyed by URL-path prefix.
///
/// Fresh prefixes are checked before static prefixes; everything else gets
/// the default TTL.
#[derive(Debug, Clone)]
pub struct EvictionPolicy {
  fresh_prefixes: Vec<String>,
  static_prefixes: Vec<String>,
  fresh_ttl: Duration,
  static_ttl: Duration,
  default_ttl: Duration,
}

impl EvictionPolicy {
  pub fn from_config(config: &SweepConfig) -> Self {
    Self {
      fresh_prefixes: config.fresh_prefixes.clone(),
      static_prefixes: config.static_prefixes.clone(),
      fresh_ttl: Duration::seconds(config.fresh_ttl_secs as i64),
      static_ttl: Duration::seconds(config.static_ttl_secs as i64),
      default_ttl: Duration::seconds(config.default_ttl_secs as i64),
    }
  }

  /// TTL for an entry at the given URL path.
  pub fn ttl_for(&self, path: &str) -> Duration {
    if self.fresh_prefixes.iter().any(|p| path.starts_with(p)) {
      self.fresh_ttl
    } else if self.static_prefixes.iter().any(|p| path.starts_with(p)) {
      self.static_ttl
    } else {
      self.default_ttl
    }
  }
}

/// Counters from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
  pub scanned: usize,
  pub evicted: usize,
  pub failures: usize,
}

/// Advisory housekeeping over every generation carrying the application's
/// cache-name prefix. Failures are logged and skipped; a sweep always
/// completes.
pub struct Sweeper<S> {
  store: Arc<S>,
  policy: EvictionPolicy,
  cache_prefix: String,
}

impl<S: CacheStore> Sweeper<S> {
  pub fn new(store: Arc<S>, policy: EvictionPolicy, cache_prefix: String) -> Self {
    Self {
      store,
      policy,
      cache_prefix,
    }
  }

  pub fn sweep(&self) -> SweepStats {
    self.sweep_at(Utc::now())
  }

  fn sweep_at(&self, now: DateTime<Utc>) -> SweepStats {
    let mut stats = SweepStats::default();

    let generations = match self.store.list_generations() {
      Ok(generations) => generations,
      Err(e) => {
        warn!(target: "sweep", "Could not enumerate generations: {}", e);
        return stats;
      }
    };

    for generation in generations {
      if !generation.starts_with(&self.cache_prefix) {
        continue;
      }

      let entries = match self.store.list_entries(&generation) {
        Ok(entries) => entries,
        Err(e) => {
          warn!(target: "sweep", "Could not enumerate {}: {}", generation, e);
          stats.failures += 1;
          continue;
        }
      };

      for entry in entries {
        stats.scanned += 1;

        let ttl = self.policy.ttl_for(entry.identity.path());
        if now - entry.captured_at <= ttl {
          continue;
        }

        match self.store.remove(&generation, &entry.identity) {
          Ok(()) => {
            stats.evicted += 1;
            debug!(target: "sweep", "Removed expired entry: {}", entry.identity.url());
          }
          Err(e) => {
            stats.failures += 1;
            warn!(target: "sweep", "Failed to remove {}: {}", entry.identity.url(), e);
          }
        }
      }
    }

    if stats.evicted > 0 {
      info!(target: "sweep", "Evicted {} of {} entries", stats.evicted, stats.scanned);
    }

    stats
  }
}
