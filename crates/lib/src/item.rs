//! Item identifiers and the collaborator interfaces the cooker drives.
//!
//! The cooker never looks inside content. It asks a [`DependencyIndex`] for the static
//! dependency graph and source timestamps, asks an [`ItemLoader`] to materialise an
//! item, and then drives the loaded [`CookItem`] through platform preparation and save.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{ASSET_EXTENSION, MAP_EXTENSION, SCRIPT_PREFIX};
use crate::platform::Platform;

/// Logical path of one unit of content, e.g. `/Game/Maps/Arena`.
///
/// Always starts with `/`, uses `/` separators and carries no file extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
  /// Normalises a logical path: backslashes become `/`, a content extension is
  /// stripped and a leading `/` is added when missing.
  pub fn new(path: impl AsRef<str>) -> Self {
    let normalized = path.as_ref().trim().replace('\\', "/");
    let stem = strip_content_extension(&normalized).trim_end_matches('/');
    if stem.starts_with('/') {
      Self(stem.to_string())
    } else {
      Self(format!("/{}", stem))
    }
  }

  /// Parses a non-empty logical path.
  pub fn parse(path: &str) -> Option<Self> {
    let id = Self::new(path);
    if id.0.len() <= 1 { None } else { Some(id) }
  }

  /// Parses a file request. Only names carrying a content extension are items.
  pub fn from_file_request(path: &str) -> Option<Self> {
    let trimmed = path.trim();
    if content_extension(trimmed).is_none() {
      return None;
    }
    Self::parse(trimmed)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Script packages are virtual references with no buildable source.
  pub fn is_script(&self) -> bool {
    self.0.starts_with(SCRIPT_PREFIX)
  }

  /// The first path segment, e.g. `Game` for `/Game/Maps/Arena`.
  pub fn mount(&self) -> &str {
    self.0[1..].split('/').next().unwrap_or_default()
  }

  /// True when this item lives under the logical directory `prefix`.
  pub fn is_under(&self, prefix: &str) -> bool {
    let dir = ItemId::new(prefix);
    self.0 == dir.0 || self.0.starts_with(&format!("{}/", dir.0))
  }

  /// Path of this item's artifact relative to a platform sandbox.
  pub fn relative_path(&self, is_map: bool) -> PathBuf {
    let ext = if is_map { MAP_EXTENSION } else { ASSET_EXTENSION };
    let mut path = PathBuf::from(&self.0[1..]);
    let file_name = format!("{}.{}", path.file_name().and_then(|n| n.to_str()).unwrap_or_default(), ext);
    path.set_file_name(file_name);
    path
  }

  /// Inverse of [`ItemId::relative_path`]. Returns `None` for non-content files.
  pub fn from_relative_path(path: &Path) -> Option<(Self, bool)> {
    let ext = path.extension()?.to_str()?;
    let is_map = match ext {
      MAP_EXTENSION => true,
      ASSET_EXTENSION => false,
      _ => return None,
    };
    let stem = path.with_extension("");
    let segments: Vec<&str> = stem.iter().map(|s| s.to_str()).collect::<Option<_>>()?;
    if segments.is_empty() {
      return None;
    }
    Some((Self::new(segments.join("/")), is_map))
  }
}

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

fn content_extension(path: &str) -> Option<&'static str> {
  if path.ends_with(&format!(".{}", MAP_EXTENSION)) {
    Some(MAP_EXTENSION)
  } else if path.ends_with(&format!(".{}", ASSET_EXTENSION)) {
    Some(ASSET_EXTENSION)
  } else {
    None
  }
}

fn strip_content_extension(path: &str) -> &str {
  match content_extension(path) {
    Some(ext) => &path[..path.len() - ext.len() - 1],
    None => path,
  }
}

/// Read-only view of the content dependency graph.
pub trait DependencyIndex: Send + Sync {
  /// Direct dependencies of `item`, or `None` when the index does not know it.
  fn dependencies(&self, item: &ItemId) -> Option<Vec<ItemId>>;

  /// Source file backing `item`, if it resolves to one.
  fn source_path(&self, item: &ItemId) -> Option<PathBuf>;

  /// Newest modification time over the item and everything it transitively imports.
  fn dependency_timestamp(&self, item: &ItemId) -> Option<SystemTime>;

  /// Whether the item is a map (saved with the map extension).
  fn is_map(&self, item: &ItemId) -> bool;

  /// Every known item under a logical directory.
  fn items_under(&self, prefix: &str) -> Vec<ItemId>;

  fn all_items(&self) -> Vec<ItemId>;
}

/// Materialises items for cooking.
pub trait ItemLoader: Send + Sync {
  fn load(&self, item: &ItemId) -> Result<Box<dyn CookItem>, LoadError>;
}

/// Result of one call to [`CookItem::prepare_for_platform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareStatus {
  Ready,
  /// Preparation is still running; call again on a later tick.
  Pending,
}

/// A loaded, heavyweight item.
pub trait CookItem: Send {
  /// Identity of what was actually loaded. May differ from the requested item.
  fn id(&self) -> &ItemId;

  fn dependencies(&self) -> Vec<ItemId>;

  /// Items pulled in while loading that the static index does not list.
  fn discovered(&self) -> Vec<ItemId>;

  /// Only referenced through editor data; nothing is written for it.
  fn editor_only(&self) -> bool;

  /// Loading this item leaves state behind that only a full reclamation clears.
  fn requires_full_reclaim(&self) -> bool;

  fn size_bytes(&self) -> u64;

  fn prepare_for_platform(&mut self, platform: &Platform) -> Result<PrepareStatus, ItemError>;

  /// Writes the platform artifact to `path` and returns the number of bytes written.
  fn save(&self, platform: &Platform, path: &Path) -> Result<u64, ItemError>;
}

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("item not found: {0}")]
  NotFound(ItemId),

  #[error("item {item} could not be read: {message}")]
  Invalid { item: ItemId, message: String },

  #[error("I/O error loading {item}: {source}")]
  Io {
    item: ItemId,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Error)]
pub enum ItemError {
  #[error("{item} has no data for platform {platform}")]
  PlatformDataMissing { item: ItemId, platform: Platform },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{0}")]
  Other(String),
}
