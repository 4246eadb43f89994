//! Per-platform configuration fingerprints.
//!
//! A fingerprint is the sorted list of `Section:Key:Value` lines describing every
//! build-relevant setting of a platform. It is saved in the platform sandbox and
//! compared byte for byte with the freshly computed one at the start of each run.

use std::path::Path;

use crate::config::PlatformConfig;
use crate::util::fs::write_atomic;
use crate::util::hash::sha256_hex;

use super::CacheError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFingerprint {
  lines: Vec<String>,
}

impl ConfigFingerprint {
  pub fn compute(config: &PlatformConfig) -> Self {
    Self {
      lines: config.fingerprint_lines(),
    }
  }

  pub fn lines(&self) -> &[String] {
    &self.lines
  }

  pub fn to_text(&self) -> String {
    let mut text = self.lines.join("\n");
    text.push('\n');
    text
  }

  pub fn digest(&self) -> String {
    sha256_hex(self.to_text().as_bytes())
  }

  pub fn save(&self, path: &Path) -> Result<(), CacheError> {
    write_atomic(path, self.to_text()).map_err(|source| CacheError::Write {
      path: path.to_path_buf(),
      source,
    })
  }

  /// True when `path` holds exactly this fingerprint. A missing file never matches.
  pub fn matches_saved(&self, path: &Path) -> Result<bool, CacheError> {
    match std::fs::read(path) {
      Ok(saved) => Ok(saved == self.to_text().as_bytes()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
      Err(source) => Err(CacheError::Read {
        path: path.to_path_buf(),
        source,
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;
  use tempfile::TempDir;

  fn config_with(value: &str) -> PlatformConfig {
    let mut section = BTreeMap::new();
    section.insert("MaxSize".to_string(), value.to_string());
    let mut settings = BTreeMap::new();
    settings.insert("Textures".to_string(), section);
    PlatformConfig {
      settings,
      ..Default::default()
    }
  }

  #[test]
  fn saved_fingerprint_matches_itself() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("Metadata").join("ConfigFingerprint.txt");
    let fingerprint = ConfigFingerprint::compute(&config_with("2048"));

    assert!(!fingerprint.matches_saved(&path).unwrap());
    fingerprint.save(&path).unwrap();
    assert!(fingerprint.matches_saved(&path).unwrap());
  }

  #[test]
  fn changed_setting_does_not_match() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ConfigFingerprint.txt");
    ConfigFingerprint::compute(&config_with("2048")).save(&path).unwrap();

    let changed = ConfigFingerprint::compute(&config_with("4096"));
    assert!(!changed.matches_saved(&path).unwrap());
    assert_ne!(changed.digest(), ConfigFingerprint::compute(&config_with("2048")).digest());
  }
}
