//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated content project.
///
/// Each test gets its own temporary project root with its own sandbox and scratch
/// directories.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("Content")).unwrap();
    Self { temp }
  }

  pub fn root(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap_or_else(|_| self.temp.path().to_path_buf())
  }

  /// Write a file relative to the project root.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// Writes `/Game/<name>` as an asset importing `imports`. Sources are backdated so
  /// artifacts written by a cook are strictly newer.
  pub fn write_asset(&self, name: &str, imports: &[&str]) -> PathBuf {
    let doc = serde_json::json!({ "imports": imports });
    let path = self.write_file(&format!("Content/{name}.uasset"), &doc.to_string());
    backdate(&path, Duration::from_secs(3600));
    path
  }

  pub fn write_map(&self, name: &str, imports: &[&str]) -> PathBuf {
    let doc = serde_json::json!({ "imports": imports });
    let path = self.write_file(&format!("Content/{name}.umap"), &doc.to_string());
    backdate(&path, Duration::from_secs(3600));
    path
  }

  pub fn write_config(&self, config: serde_json::Value) {
    self.write_file("cooker.json", &config.to_string());
  }

  pub fn sandbox(&self) -> PathBuf {
    self.root().join("Saved").join("Cooked")
  }

  /// Cooked artifact of `/Game/<name>` for `platform`.
  pub fn artifact(&self, platform: &str, name: &str) -> PathBuf {
    self.sandbox().join(platform).join("Game").join(format!("{name}.uasset"))
  }

  pub fn temp_path(&self) -> PathBuf {
    let p = self.temp.path().join("Saved").join("CookingTemp");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Get a pre-configured Command for the cook binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `COOKER_PROJECT`: The test project root
  /// - `COOKER_SANDBOX`: `<project>/Saved/Cooked`
  /// - `COOKER_TEMP`: Scratch directory for child response files
  pub fn cook_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("cook");
    cmd.env("COOKER_PROJECT", self.root());
    cmd.env("COOKER_SANDBOX", self.sandbox());
    cmd.env("COOKER_TEMP", self.temp_path());
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

pub fn backdate(path: &Path, by: Duration) {
  let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
  file.set_modified(SystemTime::now() - by).unwrap();
}

/// Parses the JSON report printed with `--output json`.
pub fn parse_report(stdout: &[u8]) -> serde_json::Value {
  serde_json::from_slice(stdout).unwrap_or_else(|e| panic!("report is not JSON ({e}): {}", String::from_utf8_lossy(stdout)))
}
