//! Project configuration loaded from `cooker.json`.
//!
//! Every field has a default so an empty object (or a missing file) is a valid
//! configuration. Command-line flags are applied on top by the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{COMPRESSED_PATH_RESERVE, CONFIG_FILENAME, DEFAULT_MAX_PATH_LEN, FORMAT_VERSIONS};
use crate::platform::{Platform, PlatformSet};
use crate::report::ErrorKind;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("no target platforms configured")]
  NoPlatforms,
}

/// Settings for one target platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
  /// Build-relevant settings as `section -> key -> value`.
  pub settings: BTreeMap<String, BTreeMap<String, String>>,
  /// Compressed output reserves part of the path budget for temporary names.
  pub compressed: bool,
  pub max_path_len: usize,
}

impl Default for PlatformConfig {
  fn default() -> Self {
    Self {
      settings: BTreeMap::new(),
      compressed: false,
      max_path_len: DEFAULT_MAX_PATH_LEN,
    }
  }
}

impl PlatformConfig {
  /// Longest artifact path this platform can write, exclusive.
  pub fn path_budget(&self) -> usize {
    if self.compressed {
      self.max_path_len.saturating_sub(COMPRESSED_PATH_RESERVE)
    } else {
      self.max_path_len
    }
  }

  /// The serialized `Section:Key:Value` lines that make up the platform fingerprint.
  pub fn fingerprint_lines(&self) -> Vec<String> {
    let mut lines: Vec<String> = self
      .settings
      .iter()
      .flat_map(|(section, keys)| keys.iter().map(move |(key, value)| format!("{}:{}:{}", section, key, value)))
      .collect();
    lines.push(format!("Output:compressed:{}", self.compressed));
    for (name, version) in FORMAT_VERSIONS {
      lines.push(format!("Format:{}:{}", name, version));
    }
    lines.sort();
    lines
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookerConfig {
  pub platforms: BTreeMap<String, PlatformConfig>,
  /// Logical directories whose items are never cooked.
  pub never_cook_dirs: Vec<String>,
  /// Maps cooked on every by-the-book run.
  pub always_cook_maps: Vec<String>,
  /// Maps cooked when nothing else was requested and none are always cooked.
  pub default_maps: Vec<String>,
  pub processes: usize,
  pub iterative: bool,
  pub packages_per_reclaim: usize,
  pub idle_reclaim_secs: u64,
  /// Ceiling on live heavyweight handles; zero disables the check.
  pub max_live_objects: usize,
  pub max_memory_bytes: u64,
  pub time_slice_ms: u64,
  pub max_items_per_tick: usize,
  /// Error kinds that fail the run.
  pub escalate: Vec<ErrorKind>,
}

impl Default for CookerConfig {
  fn default() -> Self {
    Self {
      platforms: BTreeMap::new(),
      never_cook_dirs: Vec::new(),
      always_cook_maps: Vec::new(),
      default_maps: Vec::new(),
      processes: 0,
      iterative: false,
      packages_per_reclaim: 50,
      idle_reclaim_secs: 20,
      max_live_objects: 0,
      max_memory_bytes: 8 * 1024 * 1024 * 1024,
      time_slice_ms: 10,
      max_items_per_tick: 30,
      escalate: vec![ErrorKind::LoadFailed],
    }
  }
}

impl CookerConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Loads `<project>/cooker.json`, or the defaults when the file does not exist.
  pub fn load_from_project(project: &Path) -> Result<Self, ConfigError> {
    let path = project.join(CONFIG_FILENAME);
    if !path.exists() {
      debug!(path = %path.display(), "no project config, using defaults");
      return Ok(Self::default());
    }
    Self::load(&path)
  }

  /// Settings for `platform`, defaulted when the project does not configure it.
  pub fn platform(&self, platform: &Platform) -> PlatformConfig {
    self.platforms.get(platform.name()).cloned().unwrap_or_default()
  }

  /// The explicitly requested platforms, or every configured one.
  pub fn target_platforms(&self, requested: &PlatformSet) -> Result<PlatformSet, ConfigError> {
    let platforms: PlatformSet = if requested.is_empty() {
      self.platforms.keys().map(Platform::new).collect()
    } else {
      requested.clone()
    };
    if platforms.is_empty() {
      return Err(ConfigError::NoPlatforms);
    }
    Ok(platforms)
  }

  pub fn time_slice(&self) -> Duration {
    Duration::from_millis(self.time_slice_ms)
  }

  pub fn idle_reclaim(&self) -> Duration {
    Duration::from_secs(self.idle_reclaim_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn empty_object_uses_defaults() {
    let config: CookerConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, CookerConfig::default());
    assert_eq!(config.packages_per_reclaim, 50);
    assert_eq!(config.escalate, vec![ErrorKind::LoadFailed]);
  }

  #[test]
  fn missing_project_config_is_default() {
    let temp = TempDir::new().unwrap();
    let config = CookerConfig::load_from_project(temp.path()).unwrap();
    assert_eq!(config, CookerConfig::default());
  }

  #[test]
  fn invalid_json_reports_path() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(CONFIG_FILENAME), "{ not json").unwrap();
    let err = CookerConfig::load_from_project(temp.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
  }

  #[test]
  fn fingerprint_lines_are_sorted_and_versioned() {
    let config: PlatformConfig = serde_json::from_str(
      r#"{ "settings": { "Textures": { "MaxSize": "2048" }, "Audio": { "Quality": "high" } } }"#,
    )
    .unwrap();
    let lines = config.fingerprint_lines();
    assert_eq!(lines[0], "Audio:Quality:high");
    assert!(lines.contains(&"Textures:MaxSize:2048".to_string()));
    assert!(lines.iter().any(|l| l.starts_with("Format:Artifact:")));
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted);
  }

  #[test]
  fn compressed_platforms_reserve_path_budget() {
    let platform = PlatformConfig {
      compressed: true,
      max_path_len: 100,
      ..Default::default()
    };
    assert_eq!(platform.path_budget(), 68);
  }

  #[test]
  fn target_platforms_fall_back_to_configured() {
    let config: CookerConfig = serde_json::from_str(r#"{ "platforms": { "Win64": {}, "Switch": {} } }"#).unwrap();
    let all = config.target_platforms(&PlatformSet::new()).unwrap();
    assert_eq!(all.len(), 2);

    let none = CookerConfig::default().target_platforms(&PlatformSet::new());
    assert!(matches!(none, Err(ConfigError::NoPlatforms)));
  }
}
