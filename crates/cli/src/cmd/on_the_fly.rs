//! Implementation of `cook --on-the-fly`.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::channel;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use cooker_lib::config::CookerConfig;
use cooker_lib::context::{ContextSettings, CookMode, CookerContext};
use cooker_lib::platform::{join_platforms, parse_platform_list};
use cooker_lib::server;
use cooker_lib::session::{run_cook_on_the_fly, start_cook_on_the_fly};
use cooker_lib::sandbox_lock::{LockHolder, SandboxLock};

use super::{Port, resolve_project, resolve_sandbox};
use crate::output::{OutputFormat, Tone, print_json, print_rows, service_rows, status};

pub struct OnTheFlyArgs {
  pub project: Option<PathBuf>,
  pub platforms: Option<String>,
  pub port: Port,
  pub sandbox: Option<PathBuf>,
  pub iterative: bool,
  pub output: OutputFormat,
}

pub fn cmd_on_the_fly(args: OnTheFlyArgs) -> Result<()> {
  let start = Instant::now();
  let project = resolve_project(args.project);
  let config = CookerConfig::load_from_project(&project).context("Failed to load cooker config")?;
  let sandbox = resolve_sandbox(args.sandbox, &project, None);
  let holder = LockHolder::current(CookMode::OnTheFly, args.platforms.as_deref());
  let _lock = SandboxLock::acquire(&sandbox, &holder).context("Failed to lock sandbox")?;
  let iterative = args.iterative || config.iterative;

  let settings = ContextSettings {
    platforms: args.platforms.as_deref().map(parse_platform_list).unwrap_or_default(),
    ..ContextSettings::new(config, sandbox, CookMode::OnTheFly)
  };
  let mut ctx = CookerContext::from_project(&project, settings).context("Failed to open content project")?;
  start_cook_on_the_fly(&mut ctx, iterative).context("Failed to prepare the sandbox")?;
  let platforms = join_platforms(ctx.platforms());
  let cancel = ctx.cancel_handle();
  let port = args.port.as_option();

  let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
  let report = runtime.block_on(async move {
    let listener = server::bind(port)
      .await
      .context("Failed to start the on-demand service")?;
    let addr = listener.local_addr().context("Failed to read the listening address")?;
    // Clients wait for this line before connecting.
    println!("listening on {addr}");
    info!(%addr, platforms = %platforms, "cooking on the fly");

    let (requests, incoming) = channel();
    let service = tokio::spawn(server::serve(listener, requests));
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        cancel.store(true, Ordering::SeqCst);
      }
    });

    let report = tokio::task::spawn_blocking(move || run_cook_on_the_fly(&mut ctx, incoming))
      .await
      .context("Cooker thread panicked")?
      .context("Cook failed")?;
    service.abort();
    anyhow::Ok(report)
  })?;

  if args.output.is_json() {
    print_json(&report)?;
  } else {
    status(Tone::Done, "Cook on the fly stopped");
    print_rows(&service_rows(&report, start.elapsed()));
    if !report.errors.is_empty() {
      status(Tone::Note, &format!("{} request(s) could not be cooked", report.errors.len()));
    }
  }
  Ok(())
}
