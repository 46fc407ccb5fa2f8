//! Rate-limited polling of the deployed version.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::future::Future;
use tracing::{debug, info};

/// Bookkeeping mutated only by the checker.
#[derive(Debug, Clone, Default)]
pub struct UpdateCheckState {
  pub last_check: Option<DateTime<Utc>>,
  pub update_available: bool,
  pub pending_version: Option<String>,
}

/// Outcome of one `check` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
  /// Called again before the check interval elapsed; no network call made
  Throttled,
  /// Server version equals the embedded version
  UpToDate,
  /// Network error, non-success status or malformed payload; retried at the
  /// next interval, never escalated
  Inconclusive,
  /// Server reports a different version
  UpdateAvailable { version: String },
}

/// Compares the embedded version against the version endpoint.
///
/// Versions are opaque strings compared by simple inequality.
pub struct UpdateChecker {
  current_version: String,
  check_interval: Duration,
  state: UpdateCheckState,
}

impl UpdateChecker {
  pub fn new(current_version: String, check_interval: Duration) -> Self {
    Self {
      current_version,
      check_interval,
      state: UpdateCheckState::default(),
    }
  }

  pub fn state(&self) -> &UpdateCheckState {
    &self.state
  }

  pub fn current_version(&self) -> &str {
    &self.current_version
  }

  /// The promoted version becomes current and the pending update is cleared.
  pub fn mark_updated(&mut self, version: String) {
    self.current_version = version;
    self.state.update_available = false;
    self.state.pending_version = None;
  }

  /// Run a rate-limited version check, with `fetch_version` as the network
  /// path to the version endpoint.
  pub async fn check<F, Fut>(&mut self, fetch_version: F) -> UpdateCheck
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String>>,
  {
    self.check_at(Utc::now(), fetch_version).await
  }

  async fn check_at<F, Fut>(&mut self, now: DateTime<Utc>, fetch_version: F) -> UpdateCheck
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String>>,
  {
    if let Some(last) = self.state.last_check {
      if now - last < self.check_interval {
        return UpdateCheck::Throttled;
      }
    }

    // The attempt timestamp is recorded regardless of outcome, so a failed
    // check is retried at the next interval rather than immediately.
    self.state.last_check = Some(now);

    match fetch_version().await {
      Ok(version) if version != self.current_version => {
        info!(target: "update", "New version available: {}", version);
        self.state.update_available = true;
        self.state.pending_version = Some(version.clone());
        UpdateCheck::UpdateAvailable { version }
      }
      Ok(_) => UpdateCheck::UpToDate,
      Err(e) => {
        debug!(target: "update", "Could not check for updates: {}", e);
        UpdateCheck::Inconclusive
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn checker() -> UpdateChecker {
    UpdateChecker::new("1.0.10".to_string(), Duration::hours(1))
  }

  #[tokio::test]
  async fn test_matching_version_is_up_to_date() {
    let mut checker = checker();
    let result = checker.check(|| async { Ok("1.0.10".to_string()) }).await;
    assert_eq!(result, UpdateCheck::UpToDate);
    assert!(!checker.state().update_available);
    assert!(checker.state().last_check.is_some());
  }

  #[tokio::test]
  async fn test_mismatch_records_pending_version() {
    let mut checker = checker();
    let result = checker.check(|| async { Ok("1.0.11".to_string()) }).await;
    assert_eq!(
      result,
      UpdateCheck::UpdateAvailable {
        version: "1.0.11".to_string()
      }
    );
    assert!(checker.state().update_available);
    assert_eq!(checker.state().pending_version.as_deref(), Some("1.0.11"));
  }

  #[tokio::test]
  async fn test_second_call_within_interval_makes_no_network_call() {
    let mut checker = checker();
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
      checker
        .check(|| {
          calls.fetch_add(1, Ordering::SeqCst);
          async { Ok("1.0.10".to_string()) }
        })
        .await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_check_runs_again_after_interval() {
    let mut checker = checker();
    let start = Utc::now();

    let first = checker
      .check_at(start, || async { Ok("1.0.10".to_string()) })
      .await;
    assert_eq!(first, UpdateCheck::UpToDate);

    let second = checker
      .check_at(start + Duration::minutes(30), || async {
        Ok("1.0.11".to_string())
      })
      .await;
    assert_eq!(second, UpdateCheck::Throttled);

    let third = checker
      .check_at(start + Duration::hours(1), || async {
        Ok("1.0.11".to_string())
      })
      .await;
    assert_eq!(
      third,
      UpdateCheck::UpdateAvailable {
        version: "1.0.11".to_string()
      }
    );
  }

  #[tokio::test]
  async fn test_failure_is_inconclusive_and_throttled_until_next_interval() {
    let mut checker = checker();
    let start = Utc::now();

    let first = checker
      .check_at(start, || async { Err(eyre!("connection refused")) })
      .await;
    assert_eq!(first, UpdateCheck::Inconclusive);
    assert!(!checker.state().update_available);

    // The failed attempt still counts against the interval.
    let second = checker
      .check_at(start + Duration::minutes(1), || async {
        Ok("1.0.11".to_string())
      })
      .await;
    assert_eq!(second, UpdateCheck::Throttled);
  }

  #[tokio::test]
  async fn test_mark_updated_clears_pending_state() {
    let mut checker = checker();
    checker.check(|| async { Ok("1.0.11".to_string()) }).await;

    checker.mark_updated("1.0.11".to_string());
    assert_eq!(checker.current_version(), "1.0.11");
    assert!(!checker.state().update_available);
    assert!(checker.state().pending_version.is_none());
  }
}
