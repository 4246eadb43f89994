//! Project directory conventions.
//!
//! Every location can be redirected through an environment variable so that tests
//! and child workers agree on the same layout.

use std::path::{Path, PathBuf};

/// Project root: `COOKER_PROJECT`, falling back to the current directory.
pub fn project_dir() -> PathBuf {
  if let Ok(path) = std::env::var("COOKER_PROJECT") {
    return PathBuf::from(path);
  }
  std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Root of all platform sandboxes.
///
/// `COOKER_SANDBOX` wins. Otherwise `<project>/Saved/Cooked`, or
/// `<project>/Plugins/<dlc>/Saved/Cooked` when cooking a DLC plugin.
pub fn sandbox_dir(project: &Path, dlc: Option<&str>) -> PathBuf {
  if let Ok(path) = std::env::var("COOKER_SANDBOX") {
    return PathBuf::from(path);
  }
  match dlc {
    Some(name) => project.join("Plugins").join(name).join("Saved").join("Cooked"),
    None => project.join("Saved").join("Cooked"),
  }
}

/// Scratch space for child response and result files.
pub fn temp_dir(project: &Path) -> PathBuf {
  if let Ok(path) = std::env::var("COOKER_TEMP") {
    return PathBuf::from(path);
  }
  project.join("Saved").join("CookingTemp")
}

/// `Content` directory of the project or of a plugin.
pub fn content_dir(project: &Path, plugin: Option<&str>) -> PathBuf {
  match plugin {
    Some(name) => project.join("Plugins").join(name).join("Content"),
    None => project.join("Content"),
  }
}
