//! Implementation of `cook --by-the-book`.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::{Context, Result, bail};

use cooker_lib::config::CookerConfig;
use cooker_lib::context::{ContextSettings, CookMode, CookerContext};
use cooker_lib::distribute::WorkerCommand;
use cooker_lib::platform::{join_platforms, parse_platform_list, paths};
use cooker_lib::session::{ByTheBookOptions, run_cook_by_the_book};
use cooker_lib::sandbox_lock::{LockHolder, SandboxLock};

use super::{resolve_project, resolve_sandbox};
use crate::output::{OutputFormat, print_batch_report, print_json};
use crate::reporter;

pub struct ByTheBookArgs {
  pub project: Option<PathBuf>,
  pub maps: Vec<String>,
  pub dirs: Vec<String>,
  pub platforms: Option<String>,
  pub iterative: bool,
  pub processes: Option<usize>,
  pub dlc: Option<String>,
  pub sandbox: Option<PathBuf>,
  pub leak_test: bool,
  pub dump_dependency_graph: bool,
  pub cook_child: Option<PathBuf>,
  pub output: OutputFormat,
  pub verbose: u8,
}

pub fn cmd_by_the_book(args: ByTheBookArgs) -> Result<()> {
  let start = Instant::now();
  let project = resolve_project(args.project);
  let config = CookerConfig::load_from_project(&project).context("Failed to load cooker config")?;
  let sandbox = resolve_sandbox(args.sandbox, &project, args.dlc.as_deref());
  let child = args.cook_child.is_some();

  // Children share the parent's sandbox and lock.
  let _lock = if child {
    None
  } else {
    let holder = LockHolder::current(CookMode::ByTheBook, args.platforms.as_deref());
    Some(SandboxLock::acquire(&sandbox, &holder).context("Failed to lock sandbox")?)
  };

  let processes = if child {
    0
  } else {
    args.processes.unwrap_or(config.processes)
  };
  let iterative = args.iterative || config.iterative;
  let escalate = config.escalate.clone();

  let settings = ContextSettings {
    platforms: args.platforms.as_deref().map(parse_platform_list).unwrap_or_default(),
    dlc: args.dlc.clone(),
    child,
    leak_test: args.leak_test,
    ..ContextSettings::new(config, sandbox.clone(), CookMode::ByTheBook)
  };
  let mut ctx = CookerContext::from_project(&project, settings).context("Failed to open content project")?;
  let platforms = join_platforms(ctx.platforms());

  let worker = if processes > 0 {
    Some(worker_command(&project, &sandbox, args.dlc.as_deref(), iterative)?)
  } else {
    None
  };
  let options = ByTheBookOptions {
    maps: args.maps,
    dirs: args.dirs,
    iterative,
    processes,
    child_response: args.cook_child,
    dump_dependency_graph: args.dump_dependency_graph,
    worker,
    temp_dir: Some(paths::temp_dir(&project)),
  };

  let events = reporter::spawn(ctx.subscribe(), args.verbose > 0 && !args.output.is_json());
  let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
  let cancel = ctx.cancel_handle();
  runtime.spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      cancel.store(true, Ordering::SeqCst);
    }
  });

  let report = run_cook_by_the_book(&mut ctx, &options).context("Cook failed")?;
  drop(ctx);
  let summary = events.join().unwrap_or_default();

  if args.output.is_json() {
    print_json(&report)?;
  } else {
    print_batch_report(&report, &summary.files, &platforms, start.elapsed());
  }

  if report.has_escalated(&escalate) {
    bail!("cook finished with escalated errors");
  }
  Ok(())
}

/// Command line a child worker is started with. The distributor appends the
/// response file and the platform list.
fn worker_command(project: &Path, sandbox: &Path, dlc: Option<&str>, iterative: bool) -> Result<WorkerCommand> {
  let program = std::env::current_exe().context("Failed to locate the cook executable")?;
  let mut args = vec![
    "--by-the-book".to_string(),
    "--project".to_string(),
    project.display().to_string(),
    "--sandbox".to_string(),
    sandbox.display().to_string(),
    "-v".to_string(),
  ];
  if let Some(dlc) = dlc {
    args.push("--dlc".to_string());
    args.push(dlc.to_string());
  }
  if iterative {
    args.push("--iterative".to_string());
  }
  Ok(WorkerCommand::new(program, args))
}
