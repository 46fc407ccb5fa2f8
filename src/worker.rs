//! The worker: wires store, lifecycle, interceptor, checker and sweeper, and
//! dispatches events and control messages to them.

use chrono::Duration;
use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::interceptor::{FetchInterceptor, FetchOutcome, FetchRequest};
use crate::lifecycle::{LifecycleController, LifecycleState};
use crate::manifest::AssetManifest;
use crate::message::{ControlMessage, ControlReply};
use crate::net::HttpClient;
use crate::store::CacheStore;
use crate::sweeper::{EvictionPolicy, Sweeper};
use crate::update::{UpdateCheck, UpdateChecker};

/// Owns all subsystem state for one application origin.
///
/// All configuration (version identifier included) is injected here at
/// construction; nothing is process-global.
pub struct Worker<S: CacheStore + 'static> {
  config: Config,
  manifest: AssetManifest,
  client: HttpClient,
  lifecycle: LifecycleController<S>,
  interceptor: FetchInterceptor<S>,
  checker: UpdateChecker,
  sweeper: Sweeper<S>,
}

impl<S: CacheStore + 'static> Worker<S> {
  pub fn new(config: Config, store: S) -> Result<Self> {
    let store = Arc::new(store);
    let origin = config.origin_url()?;
    let manifest = AssetManifest::new(config.manifest.clone())?;
    let client = HttpClient::new(origin.clone())?;
    let generation = config.generation_name();

    let lifecycle = LifecycleController::new(Arc::clone(&store), origin, generation.clone());
    let interceptor = FetchInterceptor::new(Arc::clone(&store), generation);
    let checker = UpdateChecker::new(
      config.app.version.clone(),
      Duration::seconds(config.update.check_interval_secs as i64),
    );
    let sweeper = Sweeper::new(
      Arc::clone(&store),
      EvictionPolicy::from_config(&config.sweep),
      config.cache_prefix(),
    );

    Ok(Self {
      config,
      manifest,
      client,
      lifecycle,
      interceptor,
      checker,
      sweeper,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn lifecycle_state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  /// Install the configured version and activate it.
  pub async fn start(&mut self) -> Result<()> {
    self.install_current().await?;
    self.lifecycle.activate()?;
    Ok(())
  }

  async fn install_current(&mut self) -> Result<()> {
    let client = self.client.clone();
    self
      .lifecycle
      .install(&self.manifest, |path| {
        let client = client.clone();
        let path = path.to_string();
        async move { client.fetch_path(&path).await }
      })
      .await
  }

  /// Process events until shutdown.
  pub async fn run(&mut self, events: &mut EventHandler) -> Result<()> {
    while let Some(event) = events.next().await {
      match event {
        Event::CheckUpdates => {
          self.check_updates().await;
        }
        Event::Sweep => {
          self.sweeper.sweep();
        }
        Event::Shutdown => {
          info!("Shutting down");
          break;
        }
      }
    }
    Ok(())
  }

  /// Handle one intercepted request, using the real network as the fetch
  /// path.
  pub async fn handle_fetch(&self, request: FetchRequest) -> Result<FetchOutcome> {
    let client = self.client.clone();
    let url = request.url.clone();
    self
      .interceptor
      .handle(&request, move || async move { client.fetch_url(&url).await })
      .await
  }

  /// Handle a typed control message. `SkipWaiting` has no reply.
  pub async fn handle_message(&mut self, message: ControlMessage) -> Result<Option<ControlReply>> {
    match message {
      ControlMessage::SkipWaiting => {
        if self.lifecycle.state() == LifecycleState::Installed {
          self.lifecycle.activate()?;
        }
        Ok(None)
      }
      ControlMessage::CheckUpdates => {
        self.check_updates().await;
        let state = self.checker.state();
        Ok(Some(ControlReply::UpdatesChecked {
          update_available: state.update_available,
          pending_version: state.pending_version.clone(),
        }))
      }
      ControlMessage::ClearCache => {
        self.lifecycle.clear_all()?;
        Ok(Some(ControlReply::CacheCleared))
      }
      ControlMessage::GetCacheInfo => Ok(Some(ControlReply::CacheInfo {
        data: self.lifecycle.cache_info()?,
      })),
    }
  }

  /// Run a rate-limited update check and, when configured, promote the new
  /// version immediately.
  pub async fn check_updates(&mut self) -> UpdateCheck {
    let client = self.client.clone();
    let result = self
      .checker
      .check(move || async move { client.fetch_version().await })
      .await;

    if let UpdateCheck::UpdateAvailable { version } = &result {
      if self.config.update.notify_user {
        info!(target: "update", "Version {} is available (running {})", version, self.checker.current_version());
      }
      if self.config.update.auto_update {
        if let Err(e) = self.apply_update(version.clone()).await {
          warn!(target: "update", "Failed to apply update {}: {}", version, e);
        }
      }
    }

    result
  }

  /// Promote `version`: activate it if its generation is already installed
  /// and waiting, otherwise reinstall under the new version and activate
  /// (the full-reload path).
  pub async fn apply_update(&mut self, version: String) -> Result<()> {
    let generation = format!("{}-v{}", self.config.app.name, version);

    if self.lifecycle.generation() == generation
      && self.lifecycle.state() == LifecycleState::Installed
    {
      self.lifecycle.activate()?;
    } else {
      self.lifecycle.set_generation(generation.clone());
      self.install_current().await?;
      self.lifecycle.activate()?;
    }

    self.interceptor.set_generation(generation);
    self.config.app.version = version.clone();
    self.checker.mark_updated(version);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{MemoryStore, RequestIdentity, StoredResponse};
  use url::Url;

  fn config() -> Config {
    serde_yaml::from_str(
      r#"
app:
  name: harry-barber
  version: "1.0.10"
  origin: "https://example.com"
manifest:
  - /
  - /index.html
"#,
    )
    .unwrap()
  }

  fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.create_generation("harry-barber-v1.0.10").unwrap();
    store
      .put(
        "harry-barber-v1.0.10",
        &RequestIdentity::get(Url::parse("https://example.com/index.html").unwrap()),
        &StoredResponse::new(200, vec![], b"<html></html>".to_vec()),
      )
      .unwrap();
    store
  }

  #[tokio::test]
  async fn test_worker_wiring() {
    let worker = Worker::new(config(), MemoryStore::new()).unwrap();
    assert_eq!(worker.lifecycle_state(), LifecycleState::Uninstalled);
    assert_eq!(worker.config().generation_name(), "harry-barber-v1.0.10");
  }

  #[tokio::test]
  async fn test_get_cache_info_message() {
    let mut worker = Worker::new(config(), seeded_store()).unwrap();

    let reply = worker
      .handle_message(ControlMessage::GetCacheInfo)
      .await
      .unwrap()
      .unwrap();
    match reply {
      ControlReply::CacheInfo { data } => {
        assert_eq!(data["harry-barber-v1.0.10"].item_count, 1);
      }
      other => panic!("unexpected reply: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_clear_cache_message() {
    let mut worker = Worker::new(config(), seeded_store()).unwrap();

    let reply = worker
      .handle_message(ControlMessage::ClearCache)
      .await
      .unwrap();
    assert_eq!(reply, Some(ControlReply::CacheCleared));

    let reply = worker
      .handle_message(ControlMessage::GetCacheInfo)
      .await
      .unwrap()
      .unwrap();
    match reply {
      ControlReply::CacheInfo { data } => assert!(data.is_empty()),
      other => panic!("unexpected reply: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_skip_waiting_without_pending_install_is_noop() {
    let mut worker = Worker::new(config(), MemoryStore::new()).unwrap();

    let reply = worker
      .handle_message(ControlMessage::SkipWaiting)
      .await
      .unwrap();
    assert!(reply.is_none());
    assert_eq!(worker.lifecycle_state(), LifecycleState::Uninstalled);
  }
}
