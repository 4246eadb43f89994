//! On-disk asset documents and the cookable item they load into.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::{CookItem, ItemError, ItemId, PrepareStatus};
use crate::platform::Platform;

#[derive(Debug, Error)]
pub enum DocumentError {
  #[error("read failed: {0}")]
  Io(#[from] io::Error),

  #[error("parse failed: {0}")]
  Parse(#[from] serde_json::Error),
}

/// JSON body of a `.uasset` / `.umap` source file. An empty file is a valid, empty asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetDocument {
  /// Static dependencies, visible to the dependency index.
  pub imports: Vec<String>,
  /// Items pulled in only when this asset is loaded.
  pub runtime_loads: Vec<String>,
  pub editor_only: bool,
  pub requires_full_reclaim: bool,
  /// Loading this asset yields another item instead.
  pub redirect: Option<String>,
  /// Prepare calls needed per platform before the data is ready.
  pub prepare_steps: u32,
  /// Platforms this asset has no data for.
  pub missing_platforms: Vec<String>,
  pub size_bytes: u64,
  pub payload: serde_json::Value,
}

impl AssetDocument {
  pub fn read(path: &Path) -> Result<Self, DocumentError> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_json::from_str(&content)?)
  }

  pub fn import_ids(&self) -> Vec<ItemId> {
    self.imports.iter().filter_map(|i| ItemId::parse(i)).collect()
  }
}

/// A loaded asset. Tracks preparation progress per platform across ticks.
#[derive(Debug)]
pub struct ContentItem {
  id: ItemId,
  doc: AssetDocument,
  progress: BTreeMap<Platform, u32>,
}

impl ContentItem {
  pub fn new(id: ItemId, doc: AssetDocument) -> Self {
    Self {
      id,
      doc,
      progress: BTreeMap::new(),
    }
  }
}

impl CookItem for ContentItem {
  fn id(&self) -> &ItemId {
    &self.id
  }

  fn dependencies(&self) -> Vec<ItemId> {
    self.doc.import_ids()
  }

  fn discovered(&self) -> Vec<ItemId> {
    self.doc.runtime_loads.iter().filter_map(|i| ItemId::parse(i)).collect()
  }

  fn editor_only(&self) -> bool {
    self.doc.editor_only
  }

  fn requires_full_reclaim(&self) -> bool {
    self.doc.requires_full_reclaim
  }

  fn size_bytes(&self) -> u64 {
    self.doc.size_bytes
  }

  fn prepare_for_platform(&mut self, platform: &Platform) -> Result<PrepareStatus, ItemError> {
    if self.doc.missing_platforms.iter().any(|p| p == platform.name()) {
      return Err(ItemError::PlatformDataMissing {
        item: self.id.clone(),
        platform: platform.clone(),
      });
    }
    let steps = self.progress.entry(platform.clone()).or_insert(0);
    *steps += 1;
    if *steps >= self.doc.prepare_steps {
      Ok(PrepareStatus::Ready)
    } else {
      Ok(PrepareStatus::Pending)
    }
  }

  fn save(&self, platform: &Platform, path: &Path) -> Result<u64, ItemError> {
    let artifact = serde_json::json!({
      "item": self.id,
      "platform": platform,
      "payload": self.doc.payload,
    });
    let bytes = serde_json::to_vec_pretty(&artifact).map_err(|e| ItemError::Other(e.to_string()))?;
    let write_err = |source| ItemError::Write {
      path: path.to_path_buf(),
      source,
    };
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, &bytes).map_err(write_err)?;
    Ok(bytes.len() as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn empty_file_is_default_document() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("Empty.uasset");
    std::fs::write(&path, "").unwrap();
    assert_eq!(AssetDocument::read(&path).unwrap(), AssetDocument::default());
  }

  #[test]
  fn prepare_takes_configured_steps() {
    let doc = AssetDocument {
      prepare_steps: 3,
      ..Default::default()
    };
    let mut item = ContentItem::new(ItemId::new("/Game/Slow"), doc);
    let win = Platform::new("Win64");
    assert_eq!(item.prepare_for_platform(&win).unwrap(), PrepareStatus::Pending);
    assert_eq!(item.prepare_for_platform(&win).unwrap(), PrepareStatus::Pending);
    assert_eq!(item.prepare_for_platform(&win).unwrap(), PrepareStatus::Ready);
  }

  #[test]
  fn missing_platform_data_is_an_error() {
    let doc = AssetDocument {
      missing_platforms: vec!["Switch".to_string()],
      ..Default::default()
    };
    let mut item = ContentItem::new(ItemId::new("/Game/Tex"), doc);
    assert!(item.prepare_for_platform(&Platform::new("Win64")).is_ok());
    assert!(matches!(
      item.prepare_for_platform(&Platform::new("Switch")),
      Err(ItemError::PlatformDataMissing { .. })
    ));
  }

  #[test]
  fn save_writes_artifact_with_payload() {
    let temp = TempDir::new().unwrap();
    let doc = AssetDocument {
      payload: serde_json::json!({ "color": "red" }),
      ..Default::default()
    };
    let item = ContentItem::new(ItemId::new("/Game/Props/Crate"), doc);
    let path = temp.path().join("Game").join("Props").join("Crate.uasset");
    let written = item.save(&Platform::new("Win64"), &path).unwrap();

    let artifact: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(written, std::fs::metadata(&path).unwrap().len());
    assert_eq!(artifact["item"], "/Game/Props/Crate");
    assert_eq!(artifact["platform"], "Win64");
    assert_eq!(artifact["payload"]["color"], "red");
  }
}
