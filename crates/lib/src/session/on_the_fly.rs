//! On-the-fly cooking: the coordinator side of the network service.
//!
//! Requests arrive over an `mpsc` channel from the connection tasks. A request for
//! an item that is already cooked is answered at once; anything else is queued at
//! the front and its reply waits until the executor reports the item finished.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::clean_sandbox;
use crate::context::{CookError, CookerContext};
use crate::events::CookEvent;
use crate::executor::{CookerTimer, tick};
use crate::governor::ReclaimReason;
use crate::item::ItemId;
use crate::platform::{Platform, PlatformSet};
use crate::registry::RegistrySnapshot;
use crate::report::RunReport;
use crate::server::{ServiceReply, ServiceRequest};

const IDLE_POLL: Duration = Duration::from_millis(50);

struct Waiter {
  item: ItemId,
  platform: Platform,
  reply: oneshot::Sender<ServiceReply>,
}

/// Cleans the sandbox and writes the initial registry snapshot for each platform.
pub fn start_cook_on_the_fly(ctx: &mut CookerContext, iterative: bool) -> Result<(), CookError> {
  ctx.begin_session()?;
  let fingerprints = ctx.fingerprints();
  let stats = clean_sandbox(&ctx.sandbox, &mut ctx.ledger, &fingerprints, ctx.index.as_ref(), iterative)?;
  debug!(populated = stats.populated, "sandbox ready for on-the-fly cooking");

  for platform in ctx.platforms.clone() {
    RegistrySnapshot::from_ledger(&ctx.ledger, ctx.index.as_ref(), &platform)
      .save(&ctx.sandbox.registry_path(&platform))?;
  }
  info!(platforms = ctx.platforms.len(), "cook on the fly started");
  Ok(())
}

/// Serves requests until the channel closes or the run is cancelled.
pub fn run_cook_on_the_fly(ctx: &mut CookerContext, requests: Receiver<ServiceRequest>) -> Result<RunReport, CookError> {
  let events = ctx.subscribe();
  let mut waiters: Vec<Waiter> = Vec::new();

  loop {
    if ctx.is_cancel_requested() {
      ctx.cancel();
      break;
    }

    let mut disconnected = false;
    loop {
      match requests.try_recv() {
        Ok(request) => accept(ctx, request, &mut waiters),
        Err(TryRecvError::Empty) => break,
        Err(TryRecvError::Disconnected) => {
          disconnected = true;
          break;
        }
      }
    }

    if ctx.has_work() {
      let mut timer = CookerTimer::time_sliced(ctx.config.time_slice());
      let outcome = tick(ctx, &mut timer);
      if let Some(reason) = outcome.requires_reclaim {
        ctx.reclaim(reason);
      }
      for event in events.try_iter() {
        if let CookEvent::ItemFinished { item, .. } = event {
          resolve(ctx, &mut waiters, &item);
        }
      }
      continue;
    }

    if disconnected {
      break;
    }
    if ctx.idle_reclaim_due() {
      ctx.reclaim(ReclaimReason::Idle);
    }
    match requests.recv_timeout(IDLE_POLL) {
      Ok(request) => accept(ctx, request, &mut waiters),
      Err(RecvTimeoutError::Timeout) => {}
      Err(RecvTimeoutError::Disconnected) => break,
    }
  }

  for waiter in waiters {
    let _ = waiter.reply.send(ServiceReply::failed("cooker shutting down"));
  }
  let report = ctx.end_session();
  info!(cooked = report.cooked, errors = report.errors.len(), "cook on the fly stopped");
  Ok(report)
}

fn accept(ctx: &mut CookerContext, request: ServiceRequest, waiters: &mut Vec<Waiter>) {
  let ServiceRequest {
    platform,
    file,
    item,
    reply,
  } = request;

  let Some(item) = item else {
    debug!(file = %file, "not a cookable file, answering immediately");
    let unsolicited = ctx.drain_unsolicited(&platform, None);
    let _ = reply.send(ServiceReply::Ready { unsolicited });
    return;
  };

  if !ctx.platforms.contains(&platform) {
    warn!(platform = %platform, item = %item, "request for a platform not being cooked");
    let _ = reply.send(ServiceReply::failed(format!("platform {platform} is not being cooked")));
    return;
  }

  if ctx.ledger.is_cooked(&item, &platform) {
    let answer = reply_for(ctx, &item, &platform);
    let _ = reply.send(answer);
    return;
  }

  debug!(item = %item, platform = %platform, "queueing requested item");
  ctx.enqueue(item.clone(), PlatformSet::from([platform.clone()]), true);
  waiters.push(Waiter { item, platform, reply });
}

fn resolve(ctx: &mut CookerContext, waiters: &mut Vec<Waiter>, finished: &ItemId) {
  let (ready, pending): (Vec<_>, Vec<_>) = waiters
    .drain(..)
    .partition(|w| &w.item == finished && ctx.ledger.is_cooked(&w.item, &w.platform));
  *waiters = pending;
  for waiter in ready {
    let answer = reply_for(ctx, &waiter.item, &waiter.platform);
    let _ = waiter.reply.send(answer);
  }
}

fn reply_for(ctx: &mut CookerContext, item: &ItemId, platform: &Platform) -> ServiceReply {
  match ctx.ledger.outcome(item, platform) {
    Some(outcome) if outcome.is_produced() => ServiceReply::Ready {
      unsolicited: ctx.drain_unsolicited(platform, Some(item)),
    },
    Some(outcome) => ServiceReply::failed(format!("{item} was not produced for {platform} ({outcome:?})")),
    None => ServiceReply::failed(format!("{item} has not been cooked for {platform}")),
  }
}
