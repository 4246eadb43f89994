//! Run-level report of what happened during a cook.
//!
//! Non-fatal failures never escape the scheduler loop. They are collected here and
//! the caller decides, per [`ErrorKind`], whether the run as a whole failed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::item::ItemId;
use crate::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  LoadFailed,
  NeverCook,
  WrongFile,
  OutsideDlc,
  PathTooLong,
  PlatformDataMissing,
  SaveFailed,
  ChildFailed,
}

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  /// The item is marked processed and the run continues.
  RecoverableSkip,
  /// Only one platform's artifact is dropped.
  RecoverablePerPlatform,
  ChildProcess,
}

impl ErrorKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ErrorKind::LoadFailed => "load_failed",
      ErrorKind::NeverCook => "never_cook",
      ErrorKind::WrongFile => "wrong_file",
      ErrorKind::OutsideDlc => "outside_dlc",
      ErrorKind::PathTooLong => "path_too_long",
      ErrorKind::PlatformDataMissing => "platform_data_missing",
      ErrorKind::SaveFailed => "save_failed",
      ErrorKind::ChildFailed => "child_failed",
    }
  }

  pub fn class(self) -> ErrorClass {
    match self {
      ErrorKind::LoadFailed | ErrorKind::NeverCook | ErrorKind::WrongFile | ErrorKind::OutsideDlc => {
        ErrorClass::RecoverableSkip
      }
      ErrorKind::PathTooLong | ErrorKind::PlatformDataMissing | ErrorKind::SaveFailed => {
        ErrorClass::RecoverablePerPlatform
      }
      ErrorKind::ChildFailed => ErrorClass::ChildProcess,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunError {
  pub kind: ErrorKind,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub item: Option<ItemId>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub platform: Option<Platform>,
  pub message: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
  /// Loader invocations, one per executor run.
  pub loaded: usize,
  /// Items saved for at least one platform.
  pub cooked: usize,
  /// Items dequeued that were already valid for every requested platform.
  pub up_to_date: usize,
  /// Items marked processed without producing output.
  pub skipped: usize,
  pub artifacts_written: usize,
  pub bytes_written: u64,
  pub reclaims: usize,
  pub children_spawned: usize,
  pub children_failed: usize,
  pub cancelled: bool,
  /// Fingerprint digest per platform.
  pub fingerprints: BTreeMap<String, String>,
  pub errors: Vec<RunError>,
  pub elapsed_ms: u64,
}

impl RunReport {
  pub fn push(&mut self, kind: ErrorKind, item: Option<&ItemId>, platform: Option<&Platform>, message: impl Into<String>) {
    self.errors.push(RunError {
      kind,
      item: item.cloned(),
      platform: platform.cloned(),
      message: message.into(),
    });
  }

  pub fn count(&self, kind: ErrorKind) -> usize {
    self.errors.iter().filter(|e| e.kind == kind).count()
  }

  /// True when any recorded error is of a kind the caller escalates to failure.
  pub fn has_escalated(&self, escalate: &[ErrorKind]) -> bool {
    self.errors.iter().any(|e| escalate.contains(&e.kind))
  }

  pub fn is_clean(&self) -> bool {
    self.errors.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn escalation_follows_policy() {
    let mut report = RunReport::default();
    report.push(ErrorKind::PathTooLong, None, Some(&Platform::new("Win64")), "too long");
    assert!(!report.has_escalated(&[ErrorKind::LoadFailed]));

    report.push(ErrorKind::LoadFailed, Some(&ItemId::new("/Game/Missing")), None, "missing");
    assert!(report.has_escalated(&[ErrorKind::LoadFailed]));
    assert_eq!(report.count(ErrorKind::LoadFailed), 1);
  }

  #[test]
  fn error_classes() {
    assert_eq!(ErrorKind::WrongFile.class(), ErrorClass::RecoverableSkip);
    assert_eq!(ErrorKind::PathTooLong.class(), ErrorClass::RecoverablePerPlatform);
    assert_eq!(ErrorKind::ChildFailed.class(), ErrorClass::ChildProcess);
  }

  #[test]
  fn kinds_serialize_snake_case() {
    let json = serde_json::to_string(&ErrorKind::PlatformDataMissing).unwrap();
    assert_eq!(json, "\"platform_data_missing\"");
    assert_eq!(json.trim_matches('"'), ErrorKind::PlatformDataMissing.as_str());
  }
}
