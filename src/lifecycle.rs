//! Cache generation lifecycle: install, activate, clear, inspect.

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::manifest::AssetManifest;
use crate::store::{CacheStore, GenerationInfo, RequestIdentity, StoredResponse};

/// Lifecycle of the generation this worker owns.
///
/// A superseded generation has no state of its own; it is simply deleted at
/// the next activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  /// Installed and ready to activate immediately (fresh-start policy; no
  /// waiting on old clients to close)
  Installed,
  Active,
}

/// Controls install and activation of the current cache generation.
pub struct LifecycleController<S> {
  store: Arc<S>,
  origin: Url,
  generation: String,
  state: LifecycleState,
}

impl<S: CacheStore> LifecycleController<S> {
  pub fn new(store: Arc<S>, origin: Url, generation: String) -> Self {
    Self {
      store,
      origin,
      generation,
      state: LifecycleState::Uninstalled,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Repoint the controller at a new version's generation.
  ///
  /// Used when an update promotes a version the worker was not started with.
  pub fn set_generation(&mut self, generation: String) {
    if generation != self.generation {
      self.generation = generation;
      self.state = LifecycleState::Uninstalled;
    }
  }

  /// Install the current generation by bulk-fetching the manifest.
  ///
  /// Atomic from the caller's perspective: every asset is fetched before
  /// anything is written, so a single failed or non-success fetch leaves the
  /// store untouched and any previously active generation in place.
  pub async fn install<F, Fut>(&mut self, manifest: &AssetManifest, fetch: F) -> Result<()>
  where
    F: Fn(&str) -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    info!(target: "cache", "Installing {} ({} assets)", self.generation, manifest.len());
    self.state = LifecycleState::Installing;

    let fetches = manifest.paths().iter().map(|path| {
      let fut = fetch(path);
      async move {
        let response = fut
          .await
          .map_err(|e| eyre!("Failed to fetch manifest asset {}: {}", path, e))?;
        if !response.is_success() {
          return Err(eyre!(
            "Manifest asset {} returned status {}",
            path,
            response.status
          ));
        }
        Ok::<_, Report>((path.as_str(), response))
      }
    });

    let assets = match try_join_all(fetches).await {
      Ok(assets) => assets,
      Err(e) => {
        // Nothing was written; previous generation (if any) stays active.
        self.state = LifecycleState::Uninstalled;
        warn!(target: "cache", "Installation of {} failed: {}", self.generation, e);
        return Err(e);
      }
    };

    let existed = self
      .store
      .list_generations()?
      .iter()
      .any(|name| name == &self.generation);
    self.store.create_generation(&self.generation)?;

    for (path, response) in assets {
      let url = self
        .origin
        .join(path)
        .map_err(|e| eyre!("Invalid manifest path '{}': {}", path, e))?;
      let identity = RequestIdentity::get(url);

      if let Err(e) = self.store.put(&self.generation, &identity, &response) {
        if !existed {
          if let Err(cleanup) = self.store.delete_generation(&self.generation) {
            warn!(target: "cache", "Failed to clean up partial {}: {}", self.generation, cleanup);
          }
        }
        self.state = LifecycleState::Uninstalled;
        return Err(e);
      }
    }

    self.state = LifecycleState::Installed;
    info!(target: "cache", "Installation of {} complete", self.generation);
    Ok(())
  }

  /// Activate the current generation, deleting every other one.
  ///
  /// Stale-generation deletion is best-effort: individual failures are
  /// logged and skipped, and activation still completes.
  pub fn activate(&mut self) -> Result<()> {
    match self.state {
      LifecycleState::Installed | LifecycleState::Active => {}
      state => {
        return Err(eyre!(
          "Cannot activate {} from {:?}; install must complete first",
          self.generation,
          state
        ));
      }
    }

    for name in self.store.list_generations()? {
      if name != self.generation {
        match self.store.delete_generation(&name) {
          Ok(()) => info!(target: "cache", "Deleted stale generation {}", name),
          Err(e) => warn!(target: "cache", "Failed to delete stale generation {}: {}", name, e),
        }
      }
    }

    self.state = LifecycleState::Active;
    info!(target: "cache", "Activated {} - fresh start", self.generation);
    Ok(())
  }

  /// Delete every generation. Returns the number deleted.
  pub fn clear_all(&mut self) -> Result<usize> {
    let names = self.store.list_generations()?;
    let deleted = names.len();
    for name in names {
      self.store.delete_generation(&name)?;
    }

    self.state = LifecycleState::Uninstalled;
    info!(target: "cache", "Cleared {} generations", deleted);
    Ok(deleted)
  }

  /// Entry counts and URLs for every generation.
  pub fn cache_info(&self) -> Result<BTreeMap<String, GenerationInfo>> {
    let mut info = BTreeMap::new();
    for name in self.store.list_generations()? {
      let entries = self.store.list_entries(&name)?;
      let items = entries
        .iter()
        .map(|entry| entry.identity.url().to_string())
        .collect();
      info.insert(
        name,
        GenerationInfo {
          item_count: entries.len(),
          items,
        },
      );
    }
    Ok(info)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;

  fn origin() -> Url {
    Url::parse("https://example.com").unwrap()
  }

  fn manifest() -> AssetManifest {
    AssetManifest::new(vec![
      "/".to_string(),
      "/index.html".to_string(),
      "/css/style2.css".to_string(),
    ])
    .unwrap()
  }

  fn controller(store: Arc<MemoryStore>) -> LifecycleController<MemoryStore> {
    LifecycleController::new(store, origin(), "app-v1.0.10".to_string())
  }

  fn ok_response() -> StoredResponse {
    StoredResponse::new(200, vec![], b"asset".to_vec())
  }

  #[tokio::test]
  async fn test_install_populates_every_manifest_path() {
    let store = Arc::new(MemoryStore::new());
    let mut lifecycle = controller(Arc::clone(&store));

    lifecycle
      .install(&manifest(), |_path| async { Ok(ok_response()) })
      .await
      .unwrap();

    assert_eq!(lifecycle.state(), LifecycleState::Installed);
    for path in manifest().paths() {
      let identity = RequestIdentity::get(origin().join(path).unwrap());
      let stored = store.get("app-v1.0.10", &identity).unwrap().unwrap();
      assert!(stored.is_success());
    }
  }

  #[tokio::test]
  async fn test_install_aborts_on_fetch_failure() {
    let store = Arc::new(MemoryStore::new());
    let mut lifecycle = controller(Arc::clone(&store));

    let result = lifecycle
      .install(&manifest(), |path| {
        let fail = path == "/css/style2.css";
        async move {
          if fail {
            Err(eyre!("connection refused"))
          } else {
            Ok(ok_response())
          }
        }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(lifecycle.state(), LifecycleState::Uninstalled);
    // No partial generation was promoted or even created.
    assert!(store.list_generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_aborts_on_non_success_status() {
    let store = Arc::new(MemoryStore::new());
    let mut lifecycle = controller(Arc::clone(&store));

    let result = lifecycle
      .install(&manifest(), |path| {
        let status = if path == "/index.html" { 404 } else { 200 };
        async move { Ok(StoredResponse::new(status, vec![], vec![])) }
      })
      .await;

    assert!(result.is_err());
    assert!(store.list_generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_install_preserves_previous_generation() {
    let store = Arc::new(MemoryStore::new());
    store.create_generation("app-v1.0.9").unwrap();

    let mut lifecycle = controller(Arc::clone(&store));
    let result = lifecycle
      .install(&manifest(), |_path| async { Err(eyre!("offline")) })
      .await;

    assert!(result.is_err());
    assert_eq!(store.list_generations().unwrap(), vec!["app-v1.0.9".to_string()]);
  }

  #[tokio::test]
  async fn test_activate_leaves_exactly_one_generation() {
    let store = Arc::new(MemoryStore::new());
    store.create_generation("app-v1.0.8").unwrap();
    store.create_generation("app-v1.0.9").unwrap();

    let mut lifecycle = controller(Arc::clone(&store));
    lifecycle
      .install(&manifest(), |_path| async { Ok(ok_response()) })
      .await
      .unwrap();
    lifecycle.activate().unwrap();

    assert_eq!(lifecycle.state(), LifecycleState::Active);
    assert_eq!(
      store.list_generations().unwrap(),
      vec!["app-v1.0.10".to_string()]
    );
  }

  #[tokio::test]
  async fn test_activate_requires_completed_install() {
    let store = Arc::new(MemoryStore::new());
    let mut lifecycle = controller(store);
    assert!(lifecycle.activate().is_err());
  }

  #[tokio::test]
  async fn test_clear_all_deletes_everything() {
    let store = Arc::new(MemoryStore::new());
    let mut lifecycle = controller(Arc::clone(&store));
    lifecycle
      .install(&manifest(), |_path| async { Ok(ok_response()) })
      .await
      .unwrap();
    lifecycle.activate().unwrap();

    let deleted = lifecycle.clear_all().unwrap();
    assert_eq!(deleted, 1);
    assert!(store.list_generations().unwrap().is_empty());
    assert_eq!(lifecycle.state(), LifecycleState::Uninstalled);
  }

  #[tokio::test]
  async fn test_cache_info_reports_counts_and_urls() {
    let store = Arc::new(MemoryStore::new());
    let mut lifecycle = controller(Arc::clone(&store));
    lifecycle
      .install(&manifest(), |_path| async { Ok(ok_response()) })
      .await
      .unwrap();

    let info = lifecycle.cache_info().unwrap();
    let generation = &info["app-v1.0.10"];
    assert_eq!(generation.item_count, 3);
    assert!(generation
      .items
      .contains(&"https://example.com/css/style2.css".to_string()));
  }

  #[tokio::test]
  async fn test_set_generation_resets_state() {
    let store = Arc::new(MemoryStore::new());
    let mut lifecycle = controller(Arc::clone(&store));
    lifecycle
      .install(&manifest(), |_path| async { Ok(ok_response()) })
      .await
      .unwrap();

    lifecycle.set_generation("app-v1.0.11".to_string());
    assert_eq!(lifecycle.generation(), "app-v1.0.11");
    assert_eq!(lifecycle.state(), LifecycleState::Uninstalled);
  }
}
