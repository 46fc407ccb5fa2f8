//! Asset manifest: the list of paths that make up the offline app shell.

use color_eyre::{eyre::eyre, Result};

/// Ordered, validated list of root-relative asset paths.
///
/// The manifest drives install: every listed path must be fetched into a new
/// generation before that generation can be activated.
#[derive(Debug, Clone)]
pub struct AssetManifest {
  paths: Vec<String>,
}

impl AssetManifest {
  /// Validate a raw path list from configuration.
  ///
  /// The manifest must be non-empty and every path must be root-relative.
  pub fn new(paths: Vec<String>) -> Result<Self> {
    if paths.is_empty() {
      return Err(eyre!("Asset manifest is empty; nothing to install"));
    }

    for path in &paths {
      if !path.starts_with('/') {
        return Err(eyre!("Manifest path '{}' is not root-relative", path));
      }
    }

    Ok(Self { paths })
  }

  pub fn paths(&self) -> &[String] {
    &self.paths
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  #[allow(dead_code)]
  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }
}
