use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Largest accepted interval or TTL, about a century in seconds.
const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 3600;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub app: AppConfig,
  /// Root-relative paths that make up the offline application shell
  pub manifest: Vec<String>,
  #[serde(default)]
  pub update: UpdateConfig,
  #[serde(default)]
  pub sweep: SweepConfig,
  /// Directory for rolling log files (stderr only if not set)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Application name; generations are named `{name}-v{version}`
  pub name: String,
  /// Deployed version identifier, compared by plain string inequality
  pub version: String,
  /// Origin the shell is served from, e.g. "https://example.com"
  pub origin: String,
  /// Cache database location (defaults to the user data directory)
  pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConfig {
  /// Minimum time between version checks
  #[serde(default = "default_check_interval_secs")]
  pub check_interval_secs: u64,
  /// Promote a new version as soon as a check finds one
  #[serde(default = "default_true")]
  pub auto_update: bool,
  /// Surface a user-facing notice when an update is found
  #[serde(default = "default_true")]
  pub notify_user: bool,
}

impl Default for UpdateConfig {
  fn default() -> Self {
    Self {
      check_interval_secs: default_check_interval_secs(),
      auto_update: true,
      notify_user: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
  /// Time between maintenance sweeps
  #[serde(default = "default_sweep_interval_secs")]
  pub interval_secs: u64,
  /// Prefixes that should always be fresh (short TTL)
  #[serde(default = "default_fresh_prefixes")]
  pub fresh_prefixes: Vec<String>,
  /// Prefixes that can be cached long (static assets)
  #[serde(default = "default_static_prefixes")]
  pub static_prefixes: Vec<String>,
  #[serde(default = "default_fresh_ttl_secs")]
  pub fresh_ttl_secs: u64,
  #[serde(default = "default_static_ttl_secs")]
  pub static_ttl_secs: u64,
  #[serde(default = "default_default_ttl_secs")]
  pub default_ttl_secs: u64,
}

impl Default for SweepConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_sweep_interval_secs(),
      fresh_prefixes: default_fresh_prefixes(),
      static_prefixes: default_static_prefixes(),
      fresh_ttl_secs: default_fresh_ttl_secs(),
      static_ttl_secs: default_static_ttl_secs(),
      default_ttl_secs: default_default_ttl_secs(),
    }
  }
}

fn default_check_interval_secs() -> u64 {
  60 * 60 // 1 hour
}

fn default_sweep_interval_secs() -> u64 {
  30 * 60 // 30 minutes
}

fn default_fresh_ttl_secs() -> u64 {
  5 * 60 // 5 minutes
}

fn default_static_ttl_secs() -> u64 {
  7 * 24 * 60 * 60 // 7 days
}

fn default_default_ttl_secs() -> u64 {
  24 * 60 * 60 // 24 hours
}

fn default_true() -> bool {
  true
}

fn default_fresh_prefixes() -> Vec<String> {
  vec!["/api/".to_string(), "/data/".to_string(), "/images/".to_string()]
}

fn default_static_prefixes() -> Vec<String> {
  vec![
    "/css/".to_string(),
    "/js/".to_string(),
    "/fonts/".to_string(),
    "/manifest.json".to_string(),
  ]
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  /// 4. ~/.config/shellcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shellcache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.app.name.is_empty() {
      return Err(eyre!("app.name must not be empty"));
    }
    if self.app.version.is_empty() {
      return Err(eyre!("app.version must not be empty"));
    }
    self.origin_url()?;

    // Everything fed into chrono::Duration::seconds must stay inside its
    // millisecond-precision i64 range.
    let durations = [
      ("update.check_interval_secs", self.update.check_interval_secs),
      ("sweep.interval_secs", self.sweep.interval_secs),
      ("sweep.fresh_ttl_secs", self.sweep.fresh_ttl_secs),
      ("sweep.static_ttl_secs", self.sweep.static_ttl_secs),
      ("sweep.default_ttl_secs", self.sweep.default_ttl_secs),
    ];
    for (field, secs) in durations {
      if secs > MAX_DURATION_SECS {
        return Err(eyre!(
          "{} is too large: {} (max {} seconds)",
          field,
          secs,
          MAX_DURATION_SECS
        ));
      }
    }

    Ok(())
  }

  /// Name of the cache generation for the configured version.
  pub fn generation_name(&self) -> String {
    format!("{}-v{}", self.app.name, self.app.version)
  }

  /// Prefix identifying this application's generations in the store.
  pub fn cache_prefix(&self) -> String {
    format!("{}-", self.app.name)
  }

  /// Parsed origin the worker fetches assets from.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.app.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", self.app.origin, e))
  }
}
