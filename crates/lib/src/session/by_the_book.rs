//! Batch ("by the book") cook of a fixed set of items.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::clean_sandbox;
use crate::consts::MIN_CHILD_PARTITION;
use crate::context::{CookError, CookerContext};
use crate::distribute::{Distributor, WorkerCommand, read_item_list, result_path, write_item_list};
use crate::executor::{CookerTimer, tick};
use crate::governor::ReclaimReason;
use crate::item::ItemId;
use crate::registry::{RegistrySnapshot, dependency_graph, write_dependency_graph};
use crate::report::RunReport;
use crate::resolver::{expand, order_for_distribution};

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct ByTheBookOptions {
  /// Maps to cook, as logical paths.
  pub maps: Vec<String>,
  /// Logical directories whose items are cooked.
  pub dirs: Vec<String>,
  pub iterative: bool,
  /// Child worker processes; zero cooks everything here.
  pub processes: usize,
  /// Cook exactly the items listed in this response file, as a child worker.
  pub child_response: Option<PathBuf>,
  pub dump_dependency_graph: bool,
  pub worker: Option<WorkerCommand>,
  /// Directory for response files.
  pub temp_dir: Option<PathBuf>,
}

/// Prepares the sandbox and queues the batch. Returns the child supervisor when the
/// batch was distributed.
pub fn start_cook_by_the_book(
  ctx: &mut CookerContext,
  options: &ByTheBookOptions,
) -> Result<Option<Distributor>, CookError> {
  ctx.begin_session()?;
  let platforms = ctx.platforms.clone();
  info!(platforms = platforms.len(), iterative = options.iterative, child = ctx.child, "starting cook by the book");

  if !ctx.child {
    for platform in &platforms {
      let path = ctx.sandbox.registry_path(platform);
      match RegistrySnapshot::load(&path) {
        Ok(Some(previous)) => debug!(platform = %platform, entries = previous.len(), "previous registry snapshot"),
        Ok(None) => {}
        Err(e) => warn!(platform = %platform, error = %e, "ignoring unreadable registry snapshot"),
      }
    }
    let fingerprints = ctx.fingerprints();
    clean_sandbox(
      &ctx.sandbox,
      &mut ctx.ledger,
      &fingerprints,
      ctx.index.as_ref(),
      options.iterative,
    )?;
  }

  let roots = collect_files_to_cook(ctx, options)?;
  for request in ctx.take_previous_requests() {
    ctx.queue.enqueue_request(request, false);
  }

  let batch = if ctx.child {
    roots
  } else {
    expand(ctx.index.as_ref(), &roots)
  };
  for item in &batch {
    ctx.queue.enqueue(item.clone(), platforms.clone(), false);
  }
  info!(roots = batch.len(), queued = ctx.queue.len(), "batch queued");

  if ctx.child || options.processes == 0 {
    return Ok(None);
  }

  let command = options.worker.as_ref().ok_or(CookError::NoWorkerCommand)?;
  let uncovered: Vec<ItemId> = batch
    .into_iter()
    .filter(|item| !ctx.ledger.covers(item, &platforms))
    .collect();
  let ordered = order_for_distribution(ctx.index.as_ref(), &uncovered);
  let temp_dir = options
    .temp_dir
    .clone()
    .unwrap_or_else(std::env::temp_dir);
  let distributor = Distributor::start(ctx, command, options.processes, MIN_CHILD_PARTITION, &temp_dir, &ordered)?;
  Ok(Some(distributor))
}

/// Roots of the batch, in the order they are queued.
///
/// A child cooks only its response file. Otherwise: always-cook maps, requested
/// maps, requested directories, DLC content, then everything plus the default maps
/// when nothing was named.
pub fn collect_files_to_cook(ctx: &CookerContext, options: &ByTheBookOptions) -> Result<Vec<ItemId>, CookError> {
  if let Some(response) = &options.child_response {
    let assigned = read_item_list(response)?;
    info!(response = %response.display(), items = assigned.len(), "child assignment read");
    return Ok(assigned);
  }

  let mut files: Vec<ItemId> = Vec::new();
  let mut push = |item: ItemId| {
    if !files.contains(&item) {
      files.push(item);
    }
  };

  for map in &ctx.config.always_cook_maps {
    push(ItemId::new(map));
  }
  for map in &options.maps {
    push(ItemId::new(map));
  }
  for dir in &options.dirs {
    let prefix = ItemId::new(dir);
    for item in ctx.index.items_under(prefix.as_str()) {
      push(item);
    }
  }
  if let Some(dlc) = ctx.dlc.as_deref() {
    for item in ctx.index.items_under(&format!("/{dlc}")) {
      push(item);
    }
  }

  let named = !options.maps.is_empty() || !options.dirs.is_empty() || ctx.dlc.is_some();
  if !named {
    for map in &ctx.config.default_maps {
      push(ItemId::new(map));
    }
    for item in ctx.index.all_items() {
      push(item);
    }
  }

  Ok(files)
}

/// Drives a batch to completion: ticks the executor, reclaims when asked and keeps
/// supervising children until all have exited.
pub fn run_cook_by_the_book(ctx: &mut CookerContext, options: &ByTheBookOptions) -> Result<RunReport, CookError> {
  let mut children = start_cook_by_the_book(ctx, options)?;

  loop {
    let mut timer = CookerTimer::batch(ctx.config.max_items_per_tick);
    let outcome = tick(ctx, &mut timer);

    if outcome.cancelled {
      if let Some(children) = children.as_mut() {
        children.kill_all();
      }
      ctx.cancel();
      return Ok(ctx.end_session());
    }
    if let Some(reason) = outcome.requires_reclaim {
      ctx.reclaim(reason);
    }
    if let Some(children) = children.as_mut() {
      children.poll(ctx);
    }

    if !ctx.has_work() {
      match children.as_ref() {
        Some(children) if !children.is_finished() => std::thread::sleep(CHILD_POLL_INTERVAL),
        _ => break,
      }
    }
  }

  finish_cook_by_the_book(ctx, options)
}

/// Writes per-platform metadata (or a child's result file) and closes the session.
pub fn finish_cook_by_the_book(ctx: &mut CookerContext, options: &ByTheBookOptions) -> Result<RunReport, CookError> {
  if let Some(response) = &options.child_response {
    write_child_result(ctx, response)?;
  } else {
    for platform in ctx.platforms.clone() {
      let snapshot = RegistrySnapshot::from_ledger(&ctx.ledger, ctx.index.as_ref(), &platform);
      snapshot.save(&ctx.sandbox.registry_path(&platform))?;

      if options.dump_dependency_graph {
        let maps: Vec<ItemId> = ctx
          .ledger
          .produced_items(&platform)
          .into_iter()
          .filter(|item| ctx.index.is_map(item))
          .collect();
        let graph = dependency_graph(ctx.index.as_ref(), &maps);
        write_dependency_graph(&ctx.sandbox.dependency_graph_path(&platform), &graph)?;
      }
    }
  }

  if ctx.governor.config().leak_test {
    ctx.reclaim(ReclaimReason::Requested);
  }

  let report = ctx.end_session();
  info!(
    cooked = report.cooked,
    up_to_date = report.up_to_date,
    errors = report.errors.len(),
    elapsed_ms = report.elapsed_ms,
    "cook by the book finished"
  );
  Ok(report)
}

fn write_child_result(ctx: &CookerContext, response: &Path) -> Result<(), CookError> {
  let path = result_path(response);
  write_item_list(&path, ctx.child_unsolicited.iter())?;
  info!(path = %path.display(), items = ctx.child_unsolicited.len(), "child result written");
  Ok(())
}
