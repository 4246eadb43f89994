//! CLI smoke tests for cook.
//!
//! These tests verify that argument handling works and that the binary returns
//! appropriate exit codes.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the cook binary.
fn cook_cmd() -> Command {
  cargo_bin_cmd!("cook")
}

/// Project with a single asset and no config file.
fn temp_project() -> TempDir {
  let temp = TempDir::new().unwrap();
  let content = temp.path().join("Content");
  std::fs::create_dir_all(&content).unwrap();
  std::fs::write(content.join("Crate.uasset"), "{}").unwrap();
  temp
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  cook_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"))
    .stdout(predicate::str::contains("--by-the-book"))
    .stdout(predicate::str::contains("--on-the-fly"));
}

#[test]
fn version_flag_works() {
  cook_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("cook"));
}

// =============================================================================
// Mode selection
// =============================================================================

#[test]
fn a_mode_is_required() {
  cook_cmd().assert().failure().stderr(predicate::str::contains("required"));
}

#[test]
fn modes_are_exclusive() {
  cook_cmd()
    .args(["--by-the-book", "--on-the-fly"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn invalid_port_is_rejected() {
  cook_cmd()
    .args(["--on-the-fly", "--port", "soon"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("auto"));
}

// =============================================================================
// by the book
// =============================================================================

#[test]
#[serial]
fn by_the_book_cooks_a_project() {
  let temp = temp_project();

  cook_cmd()
    .arg("--by-the-book")
    .arg("--project")
    .arg(temp.path())
    .args(["--platforms", "Win64"])
    .env_remove("COOKER_SANDBOX")
    .env_remove("COOKER_TEMP")
    .assert()
    .success()
    .stdout(predicate::str::contains("Cook complete"))
    .stdout(predicate::str::contains("Items cooked: 1"));

  assert!(temp.path().join("Saved/Cooked/Win64/Game/Crate.uasset").exists());
}

#[test]
#[serial]
fn by_the_book_without_platforms_fails() {
  let temp = temp_project();

  cook_cmd()
    .arg("--by-the-book")
    .arg("--project")
    .arg(temp.path())
    .env_remove("COOKER_SANDBOX")
    .assert()
    .failure();
}

#[test]
#[serial]
fn invalid_config_fails() {
  let temp = temp_project();
  std::fs::write(temp.path().join("cooker.json"), "this is not json {{{").unwrap();

  cook_cmd()
    .arg("--by-the-book")
    .arg("--project")
    .arg(temp.path())
    .args(["--platforms", "Win64"])
    .env_remove("COOKER_SANDBOX")
    .assert()
    .failure()
    .stderr(predicate::str::contains("config"));
}
