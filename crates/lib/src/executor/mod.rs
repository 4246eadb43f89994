//! Per-item build state machine.
//!
//! Every dequeued request walks
//! `Pending -> Loading -> PreparingPlatformData -> Saving -> Cooked`, or ends early in
//! `Skipped` or `Error`. Platform-data preparation may take several ticks; when it
//! is not ready the item is suspended, put back at the head of the queue and the
//! tick returns so the caller can service other work. Resuming never loads twice.

pub mod timer;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::CookOutcome;
use crate::context::{CookMode, CookerContext};
use crate::events::CookEvent;
use crate::governor::{Handle, ReclaimReason};
use crate::item::{ItemError, ItemId, PrepareStatus};
use crate::platform::PlatformSet;
use crate::queue::BuildRequest;
use crate::report::ErrorKind;

pub use timer::CookerTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
  Pending,
  Loading,
  PreparingPlatformData,
  Saving,
  Cooked,
  Skipped,
  Error,
}

impl ExecutorState {
  pub fn is_terminal(self) -> bool {
    matches!(self, ExecutorState::Cooked | ExecutorState::Skipped | ExecutorState::Error)
  }
}

/// What one tick did and why it stopped.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickOutcome {
  /// Items that wrote at least one artifact.
  pub cooked: usize,
  /// An item's platform data was not ready and the tick yielded.
  pub waiting_on_preparation: bool,
  /// The governor refused clearance for the next item.
  pub requires_reclaim: Option<ReclaimReason>,
  pub load_error: bool,
  pub cancelled: bool,
}

/// A loaded item whose preparation spans ticks.
#[derive(Debug)]
pub(crate) struct ReentryState {
  pub(crate) requested: ItemId,
  /// Id of what the loader actually produced.
  pub(crate) loaded: ItemId,
  pub(crate) handle: Handle,
  pub(crate) platforms: PlatformSet,
  pub(crate) prepared: PlatformSet,
  pub(crate) failed: PlatformSet,
  pub(crate) full_reclaim: bool,
}

enum Step {
  Finished { cooked: bool },
  Skipped,
  LoadFailed,
  Suspended,
}

/// Processes queued requests until the queue empties, the timer runs out, the
/// governor asks for a reclaim, or preparation has to wait.
pub fn tick(ctx: &mut CookerContext, timer: &mut CookerTimer) -> TickOutcome {
  let mut outcome = TickOutcome::default();
  if ctx.is_cancel_requested() {
    outcome.cancelled = true;
    return outcome;
  }

  while !timer.is_time_up() {
    if let Some(reason) = ctx.governor.reclaim_reason(&ctx.arena) {
      debug!(?reason, "governor withheld clearance");
      outcome.requires_reclaim = Some(reason);
      break;
    }
    let Some(request) = ctx.queue.dequeue() else {
      break;
    };

    match process(ctx, request) {
      Step::Finished { cooked } => {
        timer.saved_item();
        if cooked {
          outcome.cooked += 1;
        }
      }
      Step::Skipped => {}
      Step::LoadFailed => outcome.load_error = true,
      Step::Suspended => {
        outcome.waiting_on_preparation = true;
        break;
      }
    }
  }

  outcome
}

fn process(ctx: &mut CookerContext, request: BuildRequest) -> Step {
  let BuildRequest { item, platforms } = request;
  let platforms = if platforms.is_empty() {
    ctx.platforms.clone()
  } else {
    platforms
  };

  let mut state = match ctx.reentry.remove(&item) {
    Some(mut state) => {
      debug!(item = %item, "resuming suspended item");
      state.platforms.extend(platforms);
      state
    }
    None => {
      if ctx.ledger.covers(&item, &platforms) {
        debug!(item = %item, "already cooked for every requested platform");
        ctx.report.up_to_date += 1;
        finish(ctx, &item, ExecutorState::Skipped);
        return Step::Skipped;
      }
      let remaining: PlatformSet = platforms
        .into_iter()
        .filter(|p| !ctx.ledger.is_cooked(&item, p))
        .collect();

      if let Some((kind, message)) = skip_reason(ctx, &item) {
        info!(item = %item, ?kind, "{}", message);
        ctx.record_unset(&item, &remaining, CookOutcome::NotProduced);
        ctx.report.push(kind, Some(&item), None, message);
        ctx.report.skipped += 1;
        finish(ctx, &item, ExecutorState::Skipped);
        return Step::Skipped;
      }

      match load(ctx, &item, remaining) {
        Some(state) => state,
        None => return Step::LoadFailed,
      }
    }
  };

  if !prepare(ctx, &mut state) {
    debug!(item = %item, ready = state.prepared.len(), total = state.platforms.len(), "platform data pending");
    ctx.queue.enqueue(item.clone(), state.platforms.clone(), true);
    ctx.reentry.insert(item, state);
    return Step::Suspended;
  }

  let written = save(ctx, &state);
  ctx.arena.release(state.handle);
  ctx.governor.note_processed();
  if state.full_reclaim {
    ctx.governor.request_full_reclaim();
  }

  let final_state = if written > 0 {
    ctx.report.cooked += 1;
    ExecutorState::Cooked
  } else if !state.failed.is_empty() {
    ExecutorState::Error
  } else {
    ExecutorState::Skipped
  };
  if state.loaded != state.requested {
    finish(ctx, &state.loaded, final_state);
  }
  finish(ctx, &state.requested, final_state);
  Step::Finished { cooked: written > 0 }
}

fn skip_reason(ctx: &CookerContext, item: &ItemId) -> Option<(ErrorKind, String)> {
  if ctx.is_never_cook(item) {
    return Some((ErrorKind::NeverCook, "item is in a never-cook directory".to_string()));
  }
  if let Some(dlc) = ctx.dlc.as_deref()
    && item.mount() != dlc
  {
    return Some((
      ErrorKind::OutsideDlc,
      format!("item is outside plugin {dlc} and belongs to the base release"),
    ));
  }
  None
}

fn load(ctx: &mut CookerContext, item: &ItemId, platforms: PlatformSet) -> Option<ReentryState> {
  ctx.report.loaded += 1;
  let loaded = match ctx.loader.load(item) {
    Ok(loaded) => loaded,
    Err(e) => {
      error!(item = %item, error = %e, "failed to load item");
      ctx.record_unset(item, &platforms, CookOutcome::Failed);
      ctx.report.push(ErrorKind::LoadFailed, Some(item), None, e.to_string());
      finish(ctx, item, ExecutorState::Error);
      return None;
    }
  };

  let loaded_id = loaded.id().clone();
  let full_reclaim = loaded.requires_full_reclaim();
  let mut side_loaded = loaded.dependencies();
  side_loaded.extend(loaded.discovered());
  let bytes = loaded.size_bytes();
  let handle = ctx.arena.insert(loaded, bytes);
  debug!(item = %item, loaded = %loaded_id, bytes, "item loaded");

  for other in side_loaded {
    if other.is_script() || other == *item || other == loaded_id {
      continue;
    }
    if ctx.queue.exists(&other, &platforms, &ctx.ledger) {
      continue;
    }
    if ctx.child {
      ctx.child_unsolicited.insert(other);
    } else {
      debug!(item = %other, by = %item, "queueing item seen during load");
      ctx.queue.enqueue(other, platforms.clone(), false);
    }
  }

  Some(ReentryState {
    requested: item.clone(),
    loaded: loaded_id,
    handle,
    platforms,
    prepared: PlatformSet::new(),
    failed: PlatformSet::new(),
    full_reclaim,
  })
}

/// One preparation pass over the platforms still outstanding. True when none remain.
fn prepare(ctx: &mut CookerContext, state: &mut ReentryState) -> bool {
  let Some(item) = ctx.arena.get_mut(state.handle) else {
    warn!(item = %state.loaded, "loaded item vanished before preparation");
    state.failed.extend(state.platforms.iter().cloned());
    return true;
  };

  let outstanding: Vec<_> = state
    .platforms
    .iter()
    .filter(|p| !state.prepared.contains(*p) && !state.failed.contains(*p))
    .cloned()
    .collect();

  let mut ready = true;
  for platform in outstanding {
    match item.prepare_for_platform(&platform) {
      Ok(PrepareStatus::Ready) => {
        state.prepared.insert(platform);
      }
      Ok(PrepareStatus::Pending) => ready = false,
      Err(e) => {
        let kind = match e {
          ItemError::PlatformDataMissing { .. } => ErrorKind::PlatformDataMissing,
          _ => ErrorKind::SaveFailed,
        };
        warn!(item = %state.loaded, platform = %platform, error = %e, "platform data unavailable");
        ctx.ledger.record(&state.loaded, &platform, CookOutcome::Failed);
        ctx.report.push(kind, Some(&state.loaded), Some(&platform), e.to_string());
        state.failed.insert(platform);
      }
    }
  }
  ready
}

/// Writes one artifact per prepared platform. Returns how many were written.
fn save(ctx: &mut CookerContext, state: &ReentryState) -> usize {
  let is_map = ctx.index.is_map(&state.loaded);
  let Some(item) = ctx.arena.get(state.handle) else {
    return 0;
  };
  let editor_only = item.editor_only();
  let mut written = 0;

  for platform in &state.prepared {
    if ctx.ledger.outcome(&state.loaded, platform) == Some(CookOutcome::Succeeded) {
      continue;
    }
    if editor_only {
      debug!(item = %state.loaded, platform = %platform, "editor-only item, nothing to save");
      ctx.uncooked_editor_only.insert(state.loaded.clone());
      ctx.ledger.record(&state.loaded, platform, CookOutcome::NotProduced);
      continue;
    }

    let path = ctx.sandbox.artifact_path(platform, &state.loaded, is_map);
    let budget = ctx.config.platform(platform).path_budget();
    let length = path.as_os_str().len();
    if length >= budget {
      error!(item = %state.loaded, platform = %platform, length, budget, "artifact path too long");
      ctx.ledger.record(&state.loaded, platform, CookOutcome::Failed);
      ctx.report.push(
        ErrorKind::PathTooLong,
        Some(&state.loaded),
        Some(platform),
        format!("{} is {length} characters, limit is {budget}", path.display()),
      );
      continue;
    }

    match item.save(platform, &path) {
      Ok(bytes) => {
        debug!(item = %state.loaded, platform = %platform, bytes, "artifact written");
        ctx.ledger.mark_cooked(&state.loaded, platform);
        ctx.report.artifacts_written += 1;
        ctx.report.bytes_written += bytes;
        if ctx.mode == CookMode::OnTheFly {
          ctx
            .unsolicited
            .entry(platform.clone())
            .or_default()
            .push(state.loaded.clone());
        }
        ctx.events.publish(CookEvent::FileReady {
          item: state.loaded.clone(),
          platform: platform.clone(),
          path,
        });
        written += 1;
      }
      Err(e) => {
        error!(item = %state.loaded, platform = %platform, error = %e, "failed to save artifact");
        ctx.ledger.record(&state.loaded, platform, CookOutcome::Failed);
        ctx
          .report
          .push(ErrorKind::SaveFailed, Some(&state.loaded), Some(platform), e.to_string());
      }
    }
  }

  if state.loaded != state.requested {
    warn!(requested = %state.requested, loaded = %state.loaded, "loading produced a different item");
    ctx.report.push(
      ErrorKind::WrongFile,
      Some(&state.requested),
      None,
      format!("loading {} produced {}", state.requested, state.loaded),
    );
    for platform in &state.platforms {
      if !ctx.ledger.is_cooked(&state.requested, platform) {
        ctx.ledger.record(&state.requested, platform, CookOutcome::NotProduced);
      }
    }
  }

  written
}

fn finish(ctx: &mut CookerContext, item: &ItemId, state: ExecutorState) {
  ctx.events.publish(CookEvent::ItemFinished {
    item: item.clone(),
    state,
  });
}
