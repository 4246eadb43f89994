//! Test utilities for cooker-lib.
//!
//! Builds throwaway content projects on disk and provides cross-platform helpers
//! for tests that spawn processes.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::TempDir;

use crate::consts::{ASSET_EXTENSION, GAME_MOUNT, MAP_EXTENSION};
use crate::content::ContentProject;
use crate::item::ItemId;

/// A content project inside a temporary directory.
pub struct TestProject {
  pub temp: TempDir,
}

impl TestProject {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("Content")).unwrap();
    Self { temp }
  }

  pub fn root(&self) -> &Path {
    self.temp.path()
  }

  pub fn sandbox(&self) -> PathBuf {
    self.root().join("Saved").join("Cooked")
  }

  /// Source path for an item: `/Game/..` lives in `Content`, `/<Plugin>/..` in the plugin.
  pub fn source_path(&self, item: &str, is_map: bool) -> PathBuf {
    let id = ItemId::new(item);
    let mount = id.mount().to_string();
    let rest = &id.as_str()[mount.len() + 1..];
    let base = if mount == GAME_MOUNT {
      self.root().join("Content")
    } else {
      self.root().join("Plugins").join(&mount).join("Content")
    };
    let ext = if is_map { MAP_EXTENSION } else { ASSET_EXTENSION };
    base.join(format!("{}.{}", rest.trim_start_matches('/'), ext))
  }

  pub fn write_asset(&self, item: &str, doc: serde_json::Value) -> PathBuf {
    self.write(item, false, &doc.to_string())
  }

  pub fn write_map(&self, item: &str, doc: serde_json::Value) -> PathBuf {
    self.write(item, true, &doc.to_string())
  }

  pub fn write_raw(&self, item: &str, content: &str) -> PathBuf {
    self.write(item, false, content)
  }

  fn write(&self, item: &str, is_map: bool, content: &str) -> PathBuf {
    let path = self.source_path(item, is_map);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn write_config(&self, config: serde_json::Value) {
    std::fs::write(self.root().join("cooker.json"), config.to_string()).unwrap();
  }

  pub fn open(&self) -> ContentProject {
    ContentProject::open(self.root()).unwrap()
  }
}

/// Sets the modification time of `path`.
pub fn set_mtime(path: &Path, time: SystemTime) {
  let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
  file.set_modified(time).unwrap();
}

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string(), "sh".to_string()])
}
