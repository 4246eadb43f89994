//! Per-platform sandbox layout.
//!
//! ```text
//! <root>/<Platform>/<Mount>/<path>.<uasset|umap>   cooked artifacts
//! <root>/<Platform>/Metadata/ConfigFingerprint.txt
//! <root>/<Platform>/Metadata/AssetRegistry.bin
//! <root>/<Platform>/Metadata/MapDependencyGraph.json
//! ```

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::consts::{DEPENDENCY_GRAPH_FILENAME, FINGERPRINT_FILENAME, METADATA_DIR, REGISTRY_FILENAME};
use crate::item::ItemId;
use crate::platform::Platform;

use super::CacheError;

#[derive(Debug, Clone)]
pub struct Sandbox {
  root: PathBuf,
}

impl Sandbox {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Creates the sandbox root. Failure here is fatal for a run.
  pub fn ensure(&self) -> Result<(), CacheError> {
    std::fs::create_dir_all(&self.root).map_err(|source| CacheError::CreateSandbox {
      path: self.root.clone(),
      source,
    })
  }

  pub fn platform_dir(&self, platform: &Platform) -> PathBuf {
    self.root.join(platform.name())
  }

  pub fn metadata_dir(&self, platform: &Platform) -> PathBuf {
    self.platform_dir(platform).join(METADATA_DIR)
  }

  pub fn fingerprint_path(&self, platform: &Platform) -> PathBuf {
    self.metadata_dir(platform).join(FINGERPRINT_FILENAME)
  }

  pub fn registry_path(&self, platform: &Platform) -> PathBuf {
    self.metadata_dir(platform).join(REGISTRY_FILENAME)
  }

  pub fn dependency_graph_path(&self, platform: &Platform) -> PathBuf {
    self.metadata_dir(platform).join(DEPENDENCY_GRAPH_FILENAME)
  }

  pub fn artifact_path(&self, platform: &Platform, item: &ItemId, is_map: bool) -> PathBuf {
    self.platform_dir(platform).join(item.relative_path(is_map))
  }

  /// Maps an artifact path back to its item, `None` for anything that is not an artifact.
  pub fn item_for_artifact(&self, platform: &Platform, path: &Path) -> Option<ItemId> {
    let relative = path.strip_prefix(self.platform_dir(platform)).ok()?;
    if relative.starts_with(METADATA_DIR) {
      return None;
    }
    ItemId::from_relative_path(relative).map(|(item, _)| item)
  }

  /// Removes every artifact and metadata file of one platform.
  pub fn wipe_platform(&self, platform: &Platform) -> Result<(), CacheError> {
    let dir = self.platform_dir(platform);
    match std::fs::remove_dir_all(&dir) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(CacheError::Remove { path: dir, source }),
    }
  }

  /// Every artifact currently in the platform sandbox, paired with its item.
  pub fn artifacts(&self, platform: &Platform) -> Vec<(ItemId, PathBuf)> {
    let dir = self.platform_dir(platform);
    if !dir.is_dir() {
      return Vec::new();
    }
    WalkDir::new(&dir)
      .into_iter()
      .filter_entry(|e| e.depth() != 1 || e.file_name() != METADATA_DIR)
      .filter_map(Result::ok)
      .filter(|e| e.file_type().is_file())
      .filter_map(|e| {
        let item = self.item_for_artifact(platform, e.path())?;
        Some((item, e.into_path()))
      })
      .collect()
  }
}
