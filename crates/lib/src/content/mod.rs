//! File-backed content project.
//!
//! Items live as JSON documents with the `.uasset` or `.umap` extension under the
//! project's `Content` directory (mounted at `/Game/`) and under every
//! `Plugins/<name>/Content` directory (mounted at `/<name>/`). The project acts as
//! both the dependency index and the item loader.

pub mod document;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use document::{AssetDocument, ContentItem, DocumentError};

use crate::consts::GAME_MOUNT;
use crate::item::{CookItem, DependencyIndex, ItemId, ItemLoader, LoadError};
use crate::platform::paths;
use crate::util::fs::modified;

#[derive(Debug, Error)]
pub enum ContentError {
  #[error("content directory not found: {0}")]
  MissingContentDir(PathBuf),

  #[error("failed to scan content: {0}")]
  Walk(#[from] walkdir::Error),

  #[error("failed to list plugins: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct ContentEntry {
  source: PathBuf,
  is_map: bool,
  imports: Vec<ItemId>,
}

#[derive(Debug)]
pub struct ContentProject {
  root: PathBuf,
  entries: BTreeMap<ItemId, ContentEntry>,
}

impl ContentProject {
  /// Scans the project. Fails only when the project has no `Content` directory.
  pub fn open(root: &Path) -> Result<Self, ContentError> {
    let content = paths::content_dir(root, None);
    if !content.is_dir() {
      return Err(ContentError::MissingContentDir(content));
    }

    let mut entries = BTreeMap::new();
    scan_mount(&content, GAME_MOUNT, &mut entries)?;

    let plugins = root.join("Plugins");
    if plugins.is_dir() {
      for plugin in std::fs::read_dir(&plugins)? {
        let plugin = plugin?;
        let Some(name) = plugin.file_name().to_str().map(str::to_string) else {
          continue;
        };
        let plugin_content = paths::content_dir(root, Some(&name));
        if plugin_content.is_dir() {
          scan_mount(&plugin_content, &name, &mut entries)?;
        }
      }
    }

    info!(items = entries.len(), root = %root.display(), "scanned content project");
    Ok(Self {
      root: root.to_path_buf(),
      entries,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn read_document(&self, item: &ItemId) -> Result<(ItemId, AssetDocument), LoadError> {
    let entry = self.entries.get(item).ok_or_else(|| LoadError::NotFound(item.clone()))?;
    let doc = AssetDocument::read(&entry.source).map_err(|e| match e {
      DocumentError::Io(source) => LoadError::Io {
        item: item.clone(),
        source,
      },
      DocumentError::Parse(err) => LoadError::Invalid {
        item: item.clone(),
        message: err.to_string(),
      },
    })?;
    Ok((item.clone(), doc))
  }
}

fn scan_mount(dir: &Path, mount: &str, entries: &mut BTreeMap<ItemId, ContentEntry>) -> Result<(), ContentError> {
  for entry in WalkDir::new(dir).follow_links(true) {
    let entry = entry?;
    if !entry.file_type().is_file() {
      continue;
    }
    let Ok(relative) = entry.path().strip_prefix(dir) else {
      continue;
    };
    let Some((relative_id, is_map)) = ItemId::from_relative_path(relative) else {
      continue;
    };
    let item = ItemId::new(format!("/{}{}", mount, relative_id));

    let imports = match AssetDocument::read(entry.path()) {
      Ok(doc) => doc.import_ids(),
      Err(e) => {
        warn!(item = %item, error = %e, "unreadable asset, indexing without dependencies");
        Vec::new()
      }
    };

    debug!(item = %item, imports = imports.len(), "indexed item");
    entries.insert(
      item,
      ContentEntry {
        source: entry.path().to_path_buf(),
        is_map,
        imports,
      },
    );
  }
  Ok(())
}

impl DependencyIndex for ContentProject {
  fn dependencies(&self, item: &ItemId) -> Option<Vec<ItemId>> {
    self.entries.get(item).map(|e| e.imports.clone())
  }

  fn source_path(&self, item: &ItemId) -> Option<PathBuf> {
    self.entries.get(item).map(|e| e.source.clone())
  }

  fn dependency_timestamp(&self, item: &ItemId) -> Option<SystemTime> {
    let mut newest: Option<SystemTime> = None;
    let mut visited = HashSet::new();
    let mut pending = VecDeque::from([item.clone()]);

    while let Some(current) = pending.pop_front() {
      if !visited.insert(current.clone()) {
        continue;
      }
      let Some(entry) = self.entries.get(&current) else {
        continue;
      };
      if let Some(time) = modified(&entry.source) {
        newest = Some(newest.map_or(time, |n| n.max(time)));
      }
      pending.extend(entry.imports.iter().cloned());
    }

    newest
  }

  fn is_map(&self, item: &ItemId) -> bool {
    self.entries.get(item).is_some_and(|e| e.is_map)
  }

  fn items_under(&self, prefix: &str) -> Vec<ItemId> {
    self.entries.keys().filter(|id| id.is_under(prefix)).cloned().collect()
  }

  fn all_items(&self) -> Vec<ItemId> {
    self.entries.keys().cloned().collect()
  }
}

impl ItemLoader for ContentProject {
  fn load(&self, item: &ItemId) -> Result<Box<dyn CookItem>, LoadError> {
    let (id, doc) = self.read_document(item)?;
    if let Some(target) = doc.redirect.as_deref().and_then(ItemId::parse)
      && target != id
    {
      debug!(requested = %id, loaded = %target, "asset redirects to another item");
      let (target_id, target_doc) = self.read_document(&target)?;
      return Ok(Box::new(ContentItem::new(target_id, target_doc)));
    }
    Ok(Box::new(ContentItem::new(id, doc)))
  }
}
