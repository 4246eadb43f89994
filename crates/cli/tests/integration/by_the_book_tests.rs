//! Integration tests for `cook --by-the-book`.

use predicates::prelude::*;
use serial_test::serial;

use cooker_lib::context::CookMode;
use cooker_lib::sandbox_lock::{LockHolder, SandboxLock};

use crate::common::{TestEnv, parse_report};

fn arena_project() -> TestEnv {
  let env = TestEnv::new();
  env.write_map("Maps/Arena", &["/Game/Props/Crate"]);
  env.write_asset("Props/Crate", &["/Game/Props/Wood"]);
  env.write_asset("Props/Wood", &[]);
  env.write_asset("Props/Unused", &[]);
  env
}

#[test]
#[serial]
fn cooks_named_map_with_its_dependencies() {
  let env = arena_project();

  let output = env
    .cook_cmd()
    .args(["--by-the-book", "--maps", "/Game/Maps/Arena", "--platforms", "Win64", "-o", "json"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let report = parse_report(&output);
  assert_eq!(report["cooked"], 3);
  assert_eq!(report["errors"].as_array().unwrap().len(), 0);
  assert!(env.sandbox().join("Win64/Game/Maps/Arena.umap").exists());
  assert!(env.artifact("Win64", "Props/Wood").exists());
  assert!(!env.artifact("Win64", "Props/Unused").exists());
}

#[test]
#[serial]
fn text_output_summarizes_the_run() {
  let env = arena_project();

  env
    .cook_cmd()
    .args(["--by-the-book", "--platforms", "Win64+Linux"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Cook complete"))
    .stdout(predicate::str::contains("Items cooked: 4"))
    .stdout(predicate::str::contains("Artifacts (Linux): 4"))
    .stdout(predicate::str::contains("Artifacts (Win64): 4"));
}

#[test]
#[serial]
fn verbose_run_lists_written_files() {
  let env = arena_project();

  env
    .cook_cmd()
    .args(["--by-the-book", "--maps", "/Game/Maps/Arena", "--platforms", "Win64", "-v"])
    .assert()
    .success()
    .stdout(predicate::str::contains("[Win64] → /Game/Props/Wood"));
}

#[test]
#[serial]
fn iterative_rerun_is_up_to_date() {
  let env = arena_project();
  env
    .cook_cmd()
    .args(["--by-the-book", "--platforms", "Win64"])
    .assert()
    .success();

  let output = env
    .cook_cmd()
    .args(["--by-the-book", "--platforms", "Win64", "--iterative", "-o", "json"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let report = parse_report(&output);
  assert_eq!(report["loaded"], 0);
  assert_eq!(report["cooked"], 0);
  assert_eq!(report["up_to_date"], 4);
}

#[test]
#[serial]
fn full_rerun_cooks_everything_again() {
  let env = arena_project();
  env
    .cook_cmd()
    .args(["--by-the-book", "--platforms", "Win64"])
    .assert()
    .success();

  let output = env
    .cook_cmd()
    .args(["--by-the-book", "--platforms", "Win64", "-o", "json"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  assert_eq!(parse_report(&output)["cooked"], 4);
}

#[test]
#[serial]
fn missing_map_fails_the_run() {
  let env = arena_project();

  let assert = env
    .cook_cmd()
    .args(["--by-the-book", "--maps", "/Game/Maps/Missing", "--platforms", "Win64", "-o", "json"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("escalated"));

  let report = parse_report(&assert.get_output().stdout);
  assert_eq!(report["errors"][0]["kind"], "load_failed");
  assert_eq!(report["errors"][0]["item"], "/Game/Maps/Missing");
}

#[test]
#[serial]
fn escalation_policy_comes_from_config() {
  let env = arena_project();
  env.write_config(serde_json::json!({ "escalate": [] }));

  env
    .cook_cmd()
    .args(["--by-the-book", "--maps", "/Game/Maps/Missing", "--platforms", "Win64"])
    .assert()
    .success()
    .stderr(predicate::str::contains("load_failed"));
}

#[test]
#[serial]
fn dependency_graph_is_written_on_request() {
  let env = arena_project();

  env
    .cook_cmd()
    .args(["--by-the-book", "--platforms", "Win64", "--dump-dependency-graph"])
    .assert()
    .success();

  let graph = std::fs::read_to_string(env.sandbox().join("Win64/Metadata/MapDependencyGraph.json")).unwrap();
  assert!(graph.contains("/Game/Maps/Arena"));
  assert!(graph.contains("/Game/Props/Wood"));
}

#[test]
#[serial]
fn distributed_cook_spreads_items_across_children() {
  let env = TestEnv::new();
  for i in 0..15 {
    env.write_asset(&format!("Batch/Item{i:02}"), &[]);
  }

  let output = env
    .cook_cmd()
    .args(["--by-the-book", "--platforms", "Win64", "--processes", "2", "-o", "json"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let report = parse_report(&output);
  assert_eq!(report["children_spawned"], 2);
  assert_eq!(report["children_failed"], 0);
  // Two slices of five go to children, the rest is cooked here.
  assert_eq!(report["cooked"], 5);
  for i in 0..15 {
    assert!(env.artifact("Win64", &format!("Batch/Item{i:02}")).exists(), "Item{i:02}");
  }
}

#[test]
#[serial]
fn locked_sandbox_is_refused() {
  let env = arena_project();
  let holder = LockHolder::current(CookMode::OnTheFly, Some("Switch"));
  let _held = SandboxLock::acquire(&env.sandbox(), &holder).unwrap();

  env
    .cook_cmd()
    .args(["--by-the-book", "--platforms", "Win64"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("is in use by cook on-the-fly of Switch"));
}
