//! Distribution of a batch cook across child worker processes.
//!
//! The ordered batch is cut into contiguous slices, one per worker. Each slice is
//! written to a response file, claimed in the ledger so the coordinator does not
//! cook it too, and handed to a child started with `--cook-child <response>`. When
//! a child exits the coordinator reads `<response>Result.txt`, the items the child
//! saw but was not assigned, and queues whatever is still uncovered.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::CookOutcome;
use crate::consts::{CHILD_LOG_SUFFIX, CHILD_RESULT_SUFFIX};
use crate::context::CookerContext;
use crate::events::CookEvent;
use crate::item::ItemId;
use crate::platform::{PlatformSet, join_platforms};
use crate::report::ErrorKind;
use crate::util::fs::write_atomic;

#[derive(Debug, Error)]
pub enum DistributeError {
  #[error("failed to create response file in {dir}: {source}")]
  CreateResponse {
    dir: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read item list {path}: {source}")]
  ReadList {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write item list {path}: {source}")]
  WriteList {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Slices of a batch: one per worker that gets started, plus what stays local.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Partition {
  pub slices: Vec<Vec<ItemId>>,
  pub remainder: Vec<ItemId>,
}

/// Splits `items` into at most `workers` contiguous slices.
///
/// Worker `c` of `n` takes `remaining / (n + 1 - c)` items from the front, so the
/// coordinator keeps a share too. A slice smaller than `min_slice` is not worth a
/// process; its items stay in the pool for later workers or the coordinator.
pub fn partition(items: &[ItemId], workers: usize, min_slice: usize) -> Partition {
  let mut slices = Vec::new();
  let mut start = 0;
  for c in 0..workers {
    let remaining = items.len() - start;
    let take = remaining / (workers + 1 - c);
    if take < min_slice {
      continue;
    }
    slices.push(items[start..start + take].to_vec());
    start += take;
  }
  Partition {
    slices,
    remainder: items[start..].to_vec(),
  }
}

/// How to start a worker: program plus the arguments shared by every child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
  pub program: PathBuf,
  pub args: Vec<String>,
}

impl WorkerCommand {
  pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
    Self {
      program: program.into(),
      args,
    }
  }
}

pub fn result_path(response: &Path) -> PathBuf {
  suffixed(response, CHILD_RESULT_SUFFIX)
}

pub fn log_path(response: &Path) -> PathBuf {
  suffixed(response, CHILD_LOG_SUFFIX)
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
  let mut name = path.as_os_str().to_os_string();
  name.push(suffix);
  PathBuf::from(name)
}

/// Reads a newline-delimited item list. Blank lines are ignored.
pub fn read_item_list(path: &Path) -> Result<Vec<ItemId>, DistributeError> {
  let content = std::fs::read_to_string(path).map_err(|source| DistributeError::ReadList {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(content.lines().filter_map(ItemId::parse).collect())
}

pub fn write_item_list<'a>(
  path: &Path,
  items: impl IntoIterator<Item = &'a ItemId>,
) -> Result<(), DistributeError> {
  let mut content = String::new();
  for item in items {
    content.push_str(item.as_str());
    content.push('\n');
  }
  write_atomic(path, content).map_err(|source| DistributeError::WriteList {
    path: path.to_path_buf(),
    source,
  })
}

/// Writes a fresh response file under `dir` and returns its path.
pub fn write_response_file(dir: &Path, items: &[ItemId]) -> Result<PathBuf, DistributeError> {
  std::fs::create_dir_all(dir).map_err(|source| DistributeError::CreateResponse {
    dir: dir.to_path_buf(),
    source,
  })?;
  let file = tempfile::Builder::new()
    .prefix("CookChild")
    .suffix(".txt")
    .tempfile_in(dir)
    .map_err(|source| DistributeError::CreateResponse {
      dir: dir.to_path_buf(),
      source,
    })?;
  let (_, path) = file.keep().map_err(|e| DistributeError::CreateResponse {
    dir: dir.to_path_buf(),
    source: e.error,
  })?;
  write_item_list(&path, items)?;
  Ok(path)
}

pub struct ChildWorker {
  pub index: usize,
  pub response: PathBuf,
  pub items: Vec<ItemId>,
  process: Child,
  finished: bool,
}

impl ChildWorker {
  pub fn result_path(&self) -> PathBuf {
    result_path(&self.response)
  }

  pub fn log_path(&self) -> PathBuf {
    log_path(&self.response)
  }

  pub fn is_finished(&self) -> bool {
    self.finished
  }
}

/// Supervises the children of one distributed run.
pub struct Distributor {
  children: Vec<ChildWorker>,
  platforms: PlatformSet,
}

impl Distributor {
  /// Partitions `items`, claims every slice and starts one child per slice.
  ///
  /// A child that cannot be started has its slice handed back to the coordinator.
  pub fn start(
    ctx: &mut CookerContext,
    command: &WorkerCommand,
    workers: usize,
    min_slice: usize,
    temp_dir: &Path,
    items: &[ItemId],
  ) -> Result<Self, DistributeError> {
    let platforms = ctx.platforms.clone();
    let plan = partition(items, workers, min_slice);
    info!(
      workers = plan.slices.len(),
      distributed = plan.slices.iter().map(Vec::len).sum::<usize>(),
      local = plan.remainder.len(),
      "partitioned batch across workers"
    );

    let mut children = Vec::with_capacity(plan.slices.len());
    for (index, slice) in plan.slices.into_iter().enumerate() {
      let response = write_response_file(temp_dir, &slice)?;
      for item in &slice {
        ctx.queue.remove(item);
        for platform in &platforms {
          ctx.ledger.record(item, platform, CookOutcome::Claimed);
        }
      }

      match spawn(command, &response, &platforms) {
        Ok(process) => {
          info!(index, items = slice.len(), pid = process.id(), "child cooker started");
          ctx.report.children_spawned += 1;
          children.push(ChildWorker {
            index,
            response,
            items: slice,
            process,
            finished: false,
          });
        }
        Err(e) => {
          error!(index, program = %command.program.display(), error = %e, "failed to start child cooker");
          ctx.report.push(
            ErrorKind::ChildFailed,
            None,
            None,
            format!("child {index} could not be started: {e}"),
          );
          ctx.report.children_failed += 1;
          for item in &slice {
            for platform in &platforms {
              ctx.ledger.remove(item, platform);
            }
            ctx.queue.enqueue(item.clone(), platforms.clone(), false);
          }
          remove_quietly(&response);
        }
      }
    }

    Ok(Self { children, platforms })
  }

  /// Reaps exited children without blocking. Returns how many are still running.
  pub fn poll(&mut self, ctx: &mut CookerContext) -> usize {
    let mut running = 0;
    for child in self.children.iter_mut().filter(|c| !c.finished) {
      match child.process.try_wait() {
        Ok(Some(status)) => {
          child.finished = true;
          reconcile(ctx, child, Some(status), &self.platforms);
        }
        Ok(None) => running += 1,
        Err(e) => {
          warn!(index = child.index, error = %e, "lost track of child cooker");
          child.finished = true;
          reconcile(ctx, child, None, &self.platforms);
        }
      }
    }
    running
  }

  pub fn is_finished(&self) -> bool {
    self.children.iter().all(ChildWorker::is_finished)
  }

  pub fn children(&self) -> &[ChildWorker] {
    &self.children
  }

  /// Kills every child still running. Used when the run is cancelled.
  pub fn kill_all(&mut self) {
    for child in self.children.iter_mut().filter(|c| !c.finished) {
      if let Err(e) = child.process.kill() {
        debug!(index = child.index, error = %e, "child already gone");
      }
      let _ = child.process.wait();
      child.finished = true;
      remove_quietly(&child.response);
      remove_quietly(&child.result_path());
    }
  }
}

fn spawn(command: &WorkerCommand, response: &Path, platforms: &PlatformSet) -> std::io::Result<Child> {
  let log = File::create(log_path(response))?;
  let log_err = log.try_clone()?;
  Command::new(&command.program)
    .args(&command.args)
    .arg("--cook-child")
    .arg(response)
    .arg("--platforms")
    .arg(join_platforms(platforms))
    .stdin(Stdio::null())
    .stdout(Stdio::from(log))
    .stderr(Stdio::from(log_err))
    .spawn()
}

fn reconcile(ctx: &mut CookerContext, child: &ChildWorker, status: Option<ExitStatus>, platforms: &PlatformSet) {
  let success = status.is_some_and(|s| s.success());
  if success {
    info!(index = child.index, "child cooker finished");
  } else {
    let code = status.and_then(|s| s.code());
    error!(index = child.index, ?code, log = %child.log_path().display(), "child cooker failed");
    ctx.report.push(
      ErrorKind::ChildFailed,
      None,
      None,
      format!("child {} exited with {:?}, see {}", child.index, code, child.log_path().display()),
    );
    ctx.report.children_failed += 1;
  }

  let result = child.result_path();
  if result.exists() {
    match read_item_list(&result) {
      Ok(extra) => {
        let mut queued = 0;
        for item in extra {
          if !ctx.ledger.covers(&item, platforms) {
            ctx.queue.enqueue(item, platforms.clone(), false);
            queued += 1;
          }
        }
        debug!(index = child.index, queued, "folded in child results");
      }
      Err(e) => warn!(index = child.index, error = %e, "unreadable child result file"),
    }
  }

  remove_quietly(&child.response);
  remove_quietly(&result);
  ctx.events.publish(CookEvent::ChildFinished {
    index: child.index,
    success,
  });
}

fn remove_quietly(path: &Path) {
  if let Err(e) = std::fs::remove_file(path)
    && e.kind() != std::io::ErrorKind::NotFound
  {
    debug!(path = %path.display(), error = %e, "failed to remove child file");
  }
}
