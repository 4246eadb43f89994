//! Incremental cache: the cooked-record ledger and sandbox invalidation.
//!
//! Two independent signals invalidate previous output:
//! - the platform's config fingerprint differs from the one saved in its sandbox,
//!   which wipes the whole platform
//! - an artifact is older than its item's newest transitive dependency,
//!   which deletes that artifact alone
//!
//! Either one is sufficient. Whatever survives both checks is loaded back into the
//! ledger so an unchanged item is never rebuilt.

pub mod fingerprint;
pub mod sandbox;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use fingerprint::ConfigFingerprint;
pub use sandbox::Sandbox;

use crate::item::{DependencyIndex, ItemId};
use crate::platform::{Platform, PlatformSet};
use crate::util::fs::modified;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cannot create sandbox {path}: {source}")]
  CreateSandbox {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to remove {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// What happened to one (item, platform) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CookOutcome {
  /// Artifact written and valid for the current fingerprint.
  Succeeded,
  /// Assigned to a child worker for this run.
  Claimed,
  /// Processed on purpose without output (never-cook, editor-only, redirected).
  NotProduced,
  Failed,
}

impl CookOutcome {
  /// Output exists, here or in a child's partition.
  pub fn is_produced(self) -> bool {
    matches!(self, CookOutcome::Succeeded | CookOutcome::Claimed)
  }
}

/// Per-(item, platform) record of processed work.
///
/// Any recorded outcome counts as "cooked" for scheduling purposes so that failures
/// are not retried every tick.
#[derive(Debug, Default)]
pub struct CookedLedger {
  records: HashMap<ItemId, BTreeMap<Platform, CookOutcome>>,
}

impl CookedLedger {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_cooked(&self, item: &ItemId, platform: &Platform) -> bool {
    self.outcome(item, platform).is_some()
  }

  /// True when every platform in `platforms` has a record.
  pub fn covers(&self, item: &ItemId, platforms: &PlatformSet) -> bool {
    platforms.iter().all(|p| self.is_cooked(item, p))
  }

  pub fn outcome(&self, item: &ItemId, platform: &Platform) -> Option<CookOutcome> {
    self.records.get(item).and_then(|r| r.get(platform)).copied()
  }

  pub fn mark_cooked(&mut self, item: &ItemId, platform: &Platform) {
    self.record(item, platform, CookOutcome::Succeeded);
  }

  pub fn record(&mut self, item: &ItemId, platform: &Platform, outcome: CookOutcome) {
    self
      .records
      .entry(item.clone())
      .or_default()
      .insert(platform.clone(), outcome);
  }

  /// Drops every record of `item`, returning the platforms it had produced output for.
  pub fn invalidate(&mut self, item: &ItemId) -> PlatformSet {
    self
      .records
      .remove(item)
      .map(|r| {
        r.into_iter()
          .filter(|(_, outcome)| outcome.is_produced())
          .map(|(p, _)| p)
          .collect()
      })
      .unwrap_or_default()
  }

  pub fn remove(&mut self, item: &ItemId, platform: &Platform) -> bool {
    let Some(records) = self.records.get_mut(item) else {
      return false;
    };
    let removed = records.remove(platform).is_some();
    if records.is_empty() {
      self.records.remove(item);
    }
    removed
  }

  /// Drops every record for one platform. Returns how many were removed.
  pub fn remove_platform(&mut self, platform: &Platform) -> usize {
    let mut removed = 0;
    self.records.retain(|_, records| {
      if records.remove(platform).is_some() {
        removed += 1;
      }
      !records.is_empty()
    });
    removed
  }

  /// Items with output for `platform`, sorted.
  pub fn produced_items(&self, platform: &Platform) -> Vec<ItemId> {
    let mut items: Vec<ItemId> = self
      .records
      .iter()
      .filter(|(_, r)| r.get(platform).is_some_and(|o| o.is_produced()))
      .map(|(item, _)| item.clone())
      .collect();
    items.sort();
    items
  }

  /// Number of (item, platform) records.
  pub fn len(&self) -> usize {
    self.records.values().map(BTreeMap::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CleanStats {
  pub wiped_platforms: Vec<Platform>,
  pub stale_removed: usize,
  pub orphans_removed: usize,
  pub populated: usize,
}

/// Brings the sandbox and ledger in line with the current configuration and sources.
///
/// A full (non-iterative) clean wipes every platform. An iterative clean wipes only
/// platforms whose fingerprint changed, then deletes stale and orphaned artifacts
/// and records everything left as already cooked. Current fingerprints are saved
/// afterwards in both modes.
pub fn clean_sandbox(
  sandbox: &Sandbox,
  ledger: &mut CookedLedger,
  fingerprints: &BTreeMap<Platform, ConfigFingerprint>,
  index: &dyn DependencyIndex,
  iterative: bool,
) -> Result<CleanStats, CacheError> {
  let mut stats = CleanStats::default();

  for (platform, fingerprint) in fingerprints {
    let fingerprint_path = sandbox.fingerprint_path(platform);
    let wipe = !iterative || !fingerprint.matches_saved(&fingerprint_path)?;

    if wipe {
      if iterative {
        info!(platform = %platform, "config fingerprint changed, wiping platform sandbox");
      } else {
        info!(platform = %platform, "full cook, wiping platform sandbox");
      }
      sandbox.wipe_platform(platform)?;
      ledger.remove_platform(platform);
      stats.wiped_platforms.push(platform.clone());
    } else {
      sweep_platform(sandbox, ledger, platform, index, &mut stats)?;
    }

    fingerprint.save(&fingerprint_path)?;
  }

  info!(
    wiped = stats.wiped_platforms.len(),
    stale = stats.stale_removed,
    orphans = stats.orphans_removed,
    populated = stats.populated,
    "sandbox cleaned"
  );
  Ok(stats)
}

fn sweep_platform(
  sandbox: &Sandbox,
  ledger: &mut CookedLedger,
  platform: &Platform,
  index: &dyn DependencyIndex,
  stats: &mut CleanStats,
) -> Result<(), CacheError> {
  for (item, path) in sandbox.artifacts(platform) {
    if index.source_path(&item).is_none() {
      debug!(item = %item, platform = %platform, "removing orphaned artifact");
      remove_artifact(&path)?;
      ledger.remove(&item, platform);
      stats.orphans_removed += 1;
      continue;
    }

    let stale = match (modified(&path), index.dependency_timestamp(&item)) {
      (Some(artifact), Some(dependency)) => artifact < dependency,
      (None, _) => true,
      (Some(_), None) => false,
    };

    if stale {
      debug!(item = %item, platform = %platform, "artifact older than its dependencies");
      remove_artifact(&path)?;
      ledger.remove(&item, platform);
      stats.stale_removed += 1;
    } else {
      ledger.mark_cooked(&item, platform);
      stats.populated += 1;
    }
  }
  Ok(())
}

fn remove_artifact(path: &std::path::Path) -> Result<(), CacheError> {
  std::fs::remove_file(path).or_else(|e| {
    if e.kind() == std::io::ErrorKind::NotFound {
      Ok(())
    } else {
      warn!(path = %path.display(), error = %e, "failed to remove artifact");
      Err(CacheError::Remove {
        path: path.to_path_buf(),
        source: e,
      })
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PlatformConfig;
  use crate::util::testutil::{TestProject, set_mtime};
  use std::time::{Duration, SystemTime};

  fn win() -> Platform {
    Platform::new("Win64")
  }

  fn fingerprints(config: &PlatformConfig) -> BTreeMap<Platform, ConfigFingerprint> {
    BTreeMap::from([(win(), ConfigFingerprint::compute(config))])
  }

  fn write_artifact(sandbox: &Sandbox, item: &str) -> PathBuf {
    let path = sandbox.artifact_path(&win(), &ItemId::new(item), false);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "cooked").unwrap();
    path
  }

  #[test]
  fn mark_then_invalidate() {
    let mut ledger = CookedLedger::new();
    let item = ItemId::new("/Game/A");
    assert!(!ledger.is_cooked(&item, &win()));

    ledger.mark_cooked(&item, &win());
    assert!(ledger.is_cooked(&item, &win()));
    assert!(ledger.is_cooked(&item, &win()));

    let platforms = ledger.invalidate(&item);
    assert_eq!(platforms, PlatformSet::from([win()]));
    assert!(!ledger.is_cooked(&item, &win()));
  }

  #[test]
  fn invalidate_reports_only_produced_platforms() {
    let mut ledger = CookedLedger::new();
    let item = ItemId::new("/Game/A");
    ledger.record(&item, &win(), CookOutcome::Failed);
    ledger.record(&item, &Platform::new("Switch"), CookOutcome::Claimed);
    assert_eq!(ledger.invalidate(&item), PlatformSet::from([Platform::new("Switch")]));
  }

  #[test]
  fn remove_platform_only_touches_that_platform() {
    let mut ledger = CookedLedger::new();
    let item = ItemId::new("/Game/A");
    ledger.mark_cooked(&item, &win());
    ledger.mark_cooked(&item, &Platform::new("Switch"));
    assert_eq!(ledger.remove_platform(&win()), 1);
    assert!(!ledger.is_cooked(&item, &win()));
    assert!(ledger.is_cooked(&item, &Platform::new("Switch")));
    assert_eq!(ledger.len(), 1);
  }

  #[test]
  fn iterative_clean_populates_up_to_date_artifacts() {
    let project = TestProject::new();
    let source = project.write_asset("/Game/A", serde_json::json!({}));
    set_mtime(&source, SystemTime::now() - Duration::from_secs(3600));
    let index = project.open();
    let sandbox = Sandbox::new(project.sandbox());
    let config = PlatformConfig::default();
    let mut ledger = CookedLedger::new();

    clean_sandbox(&sandbox, &mut ledger, &fingerprints(&config), &index, true).unwrap();
    write_artifact(&sandbox, "/Game/A");

    let mut fresh = CookedLedger::new();
    let stats = clean_sandbox(&sandbox, &mut fresh, &fingerprints(&config), &index, true).unwrap();
    assert_eq!(stats.populated, 1);
    assert!(fresh.is_cooked(&ItemId::new("/Game/A"), &win()));
  }

  #[test]
  fn fingerprint_change_wipes_platform_records() {
    let project = TestProject::new();
    project.write_asset("/Game/A", serde_json::json!({}));
    let index = project.open();
    let sandbox = Sandbox::new(project.sandbox());
    let mut ledger = CookedLedger::new();

    clean_sandbox(&sandbox, &mut ledger, &fingerprints(&PlatformConfig::default()), &index, true).unwrap();
    let artifact = write_artifact(&sandbox, "/Game/A");
    ledger.mark_cooked(&ItemId::new("/Game/A"), &win());

    let changed = PlatformConfig {
      compressed: true,
      ..Default::default()
    };
    let stats = clean_sandbox(&sandbox, &mut ledger, &fingerprints(&changed), &index, true).unwrap();
    assert_eq!(stats.wiped_platforms, vec![win()]);
    assert!(!ledger.is_cooked(&ItemId::new("/Game/A"), &win()));
    assert!(!artifact.exists());
    assert!(ConfigFingerprint::compute(&changed).matches_saved(&sandbox.fingerprint_path(&win())).unwrap());
  }

  #[test]
  fn stale_artifact_is_deleted() {
    let project = TestProject::new();
    let source = project.write_asset("/Game/A", serde_json::json!({}));
    let index = project.open();
    let sandbox = Sandbox::new(project.sandbox());
    let config = PlatformConfig::default();
    let mut ledger = CookedLedger::new();
    clean_sandbox(&sandbox, &mut ledger, &fingerprints(&config), &index, true).unwrap();

    let artifact = write_artifact(&sandbox, "/Game/A");
    set_mtime(&artifact, SystemTime::now() - Duration::from_secs(3600));
    set_mtime(&source, SystemTime::now());

    let stats = clean_sandbox(&sandbox, &mut ledger, &fingerprints(&config), &index, true).unwrap();
    assert_eq!(stats.stale_removed, 1);
    assert!(!artifact.exists());
    assert!(!ledger.is_cooked(&ItemId::new("/Game/A"), &win()));
  }

  #[test]
  fn orphaned_artifact_is_deleted() {
    let project = TestProject::new();
    let index = project.open();
    let sandbox = Sandbox::new(project.sandbox());
    let config = PlatformConfig::default();
    let mut ledger = CookedLedger::new();
    clean_sandbox(&sandbox, &mut ledger, &fingerprints(&config), &index, true).unwrap();

    let artifact = write_artifact(&sandbox, "/Game/Removed");
    let stats = clean_sandbox(&sandbox, &mut ledger, &fingerprints(&config), &index, true).unwrap();
    assert_eq!(stats.orphans_removed, 1);
    assert!(!artifact.exists());
  }

  #[test]
  fn full_clean_wipes_even_with_matching_fingerprint() {
    let project = TestProject::new();
    project.write_asset("/Game/A", serde_json::json!({}));
    let index = project.open();
    let sandbox = Sandbox::new(project.sandbox());
    let config = PlatformConfig::default();
    let mut ledger = CookedLedger::new();
    clean_sandbox(&sandbox, &mut ledger, &fingerprints(&config), &index, true).unwrap();
    let artifact = write_artifact(&sandbox, "/Game/A");

    let stats = clean_sandbox(&sandbox, &mut ledger, &fingerprints(&config), &index, false).unwrap();
    assert_eq!(stats.wiped_platforms, vec![win()]);
    assert!(!artifact.exists());
  }
}
