//! The cooker context: the single owner of all scheduling state.
//!
//! Every mutation of the queue, the ledger and the arena goes through a
//! [`CookerContext`] held by one coordinating thread. Producers on other threads
//! (the network service, child-process pollers) hand their requests to that
//! thread instead of touching the queue directly.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, ConfigFingerprint, CookOutcome, CookedLedger, Sandbox};
use crate::config::{ConfigError, CookerConfig};
use crate::content::{ContentError, ContentProject};
use crate::distribute::DistributeError;
use crate::events::{CookEvent, EventBus};
use crate::executor::ReentryState;
use crate::governor::{Arena, GovernorConfig, Handle, MemoryGovernor, ReclaimReason, ReclaimStats};
use crate::item::{CookItem, DependencyIndex, ItemId, ItemLoader};
use crate::platform::{Platform, PlatformSet};
use crate::queue::{BuildRequest, RequestQueue};
use crate::registry::RegistryError;
use crate::report::RunReport;
use crate::server::ServerError;
use crate::sandbox_lock::SandboxLockError;

/// Top-level failure of a cook session. Per-item failures never surface here; they
/// are collected in the [`RunReport`].
#[derive(Debug, Error)]
pub enum CookError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Content(#[from] ContentError),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Distribute(#[from] DistributeError),

  #[error(transparent)]
  Lock(#[from] SandboxLockError),

  #[error(transparent)]
  Server(#[from] ServerError),

  #[error("a cook session is already running")]
  AlreadyRunning,

  #[error("worker processes requested but no worker command was given")]
  NoWorkerCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookMode {
  /// Batch cook of a fixed set of items.
  ByTheBook,
  /// Long-running service cooking items as they are requested.
  OnTheFly,
}

#[derive(Debug, Clone)]
pub struct ContextSettings {
  pub config: CookerConfig,
  /// Requested platforms; empty selects every configured platform.
  pub platforms: PlatformSet,
  pub sandbox: PathBuf,
  pub mode: CookMode,
  /// Plugin whose content is being cooked as downloadable content.
  pub dlc: Option<String>,
  /// This process is a child worker of a distributed cook.
  pub child: bool,
  pub leak_test: bool,
}

impl ContextSettings {
  pub fn new(config: CookerConfig, sandbox: impl Into<PathBuf>, mode: CookMode) -> Self {
    Self {
      config,
      platforms: PlatformSet::new(),
      sandbox: sandbox.into(),
      mode,
      dlc: None,
      child: false,
      leak_test: false,
    }
  }
}

pub struct CookerContext {
  pub(crate) config: CookerConfig,
  pub(crate) mode: CookMode,
  pub(crate) platforms: PlatformSet,
  pub(crate) sandbox: Sandbox,
  pub(crate) queue: RequestQueue,
  pub(crate) ledger: CookedLedger,
  pub(crate) index: Arc<dyn DependencyIndex>,
  pub(crate) loader: Arc<dyn ItemLoader>,
  pub(crate) governor: MemoryGovernor,
  pub(crate) arena: Arena<Box<dyn CookItem>>,
  pub(crate) events: EventBus,
  pub(crate) report: RunReport,
  pub(crate) dlc: Option<String>,
  pub(crate) child: bool,
  /// Items a child worker saw but was not assigned.
  pub(crate) child_unsolicited: BTreeSet<ItemId>,
  pub(crate) uncooked_editor_only: BTreeSet<ItemId>,
  /// Cooked but not yet announced to network clients, per platform.
  pub(crate) unsolicited: BTreeMap<Platform, Vec<ItemId>>,
  pub(crate) reentry: HashMap<ItemId, ReentryState>,
  previous_requests: Vec<BuildRequest>,
  never_cook: Vec<String>,
  cancel: Arc<AtomicBool>,
  running: bool,
  started: Option<Instant>,
}

impl CookerContext {
  pub fn new(
    settings: ContextSettings,
    index: Arc<dyn DependencyIndex>,
    loader: Arc<dyn ItemLoader>,
  ) -> Result<Self, CookError> {
    let ContextSettings {
      config,
      platforms,
      sandbox,
      mode,
      dlc,
      child,
      leak_test,
    } = settings;

    let platforms = config.target_platforms(&platforms)?;
    let sandbox = Sandbox::new(sandbox);
    sandbox.ensure()?;
    let sandbox = Sandbox::new(dunce::canonicalize(sandbox.root()).unwrap_or_else(|_| sandbox.root().to_path_buf()));

    let governor = MemoryGovernor::new(GovernorConfig {
      packages_per_reclaim: config.packages_per_reclaim,
      idle_threshold: config.idle_reclaim(),
      max_live_objects: config.max_live_objects,
      max_memory_bytes: config.max_memory_bytes,
      leak_test,
    });

    let never_cook = config
      .never_cook_dirs
      .iter()
      .map(|dir| ItemId::new(dir).as_str().to_string())
      .collect();

    debug!(
      platforms = platforms.len(),
      sandbox = %sandbox.root().display(),
      ?mode,
      child,
      "cooker context created"
    );

    Ok(Self {
      config,
      mode,
      platforms,
      sandbox,
      queue: RequestQueue::new(),
      ledger: CookedLedger::new(),
      index,
      loader,
      governor,
      arena: Arena::new(),
      events: EventBus::new(),
      report: RunReport::default(),
      dlc,
      child,
      child_unsolicited: BTreeSet::new(),
      uncooked_editor_only: BTreeSet::new(),
      unsolicited: BTreeMap::new(),
      reentry: HashMap::new(),
      previous_requests: Vec::new(),
      never_cook,
      cancel: Arc::new(AtomicBool::new(false)),
      running: false,
      started: None,
    })
  }

  /// Context over a content project on disk, which serves as both index and loader.
  pub fn from_project(project: &Path, settings: ContextSettings) -> Result<Self, CookError> {
    let content = Arc::new(ContentProject::open(project)?);
    info!(project = %project.display(), items = content.len(), "content project indexed");
    Self::new(settings, content.clone(), content)
  }

  pub fn config(&self) -> &CookerConfig {
    &self.config
  }

  pub fn mode(&self) -> CookMode {
    self.mode
  }

  pub fn platforms(&self) -> &PlatformSet {
    &self.platforms
  }

  pub fn sandbox(&self) -> &Sandbox {
    &self.sandbox
  }

  pub fn queue(&self) -> &RequestQueue {
    &self.queue
  }

  pub fn ledger(&self) -> &CookedLedger {
    &self.ledger
  }

  pub fn index(&self) -> &dyn DependencyIndex {
    self.index.as_ref()
  }

  pub fn report(&self) -> &RunReport {
    &self.report
  }

  pub fn dlc(&self) -> Option<&str> {
    self.dlc.as_deref()
  }

  pub fn is_child(&self) -> bool {
    self.child
  }

  pub fn child_unsolicited(&self) -> &BTreeSet<ItemId> {
    &self.child_unsolicited
  }

  pub fn uncooked_editor_only(&self) -> &BTreeSet<ItemId> {
    &self.uncooked_editor_only
  }

  /// Number of items whose preparation is suspended between ticks.
  pub fn suspended(&self) -> usize {
    self.reentry.len()
  }

  pub fn live_objects(&self) -> usize {
    self.arena.live()
  }

  pub fn subscribe(&mut self) -> Receiver<CookEvent> {
    self.events.subscribe()
  }

  /// Queues `item`. An empty platform set means every session platform.
  pub fn enqueue(&mut self, item: ItemId, platforms: PlatformSet, front: bool) -> bool {
    let platforms = if platforms.is_empty() {
      self.platforms.clone()
    } else {
      platforms
    };
    self.queue.enqueue(item, platforms, front)
  }

  pub fn is_cooked(&self, item: &ItemId, platform: &Platform) -> bool {
    self.ledger.is_cooked(item, platform)
  }

  pub fn mark_cooked(&mut self, item: &ItemId, platform: &Platform) {
    self.ledger.mark_cooked(item, platform);
  }

  /// True when `item` is pending or recorded for every platform in `platforms`.
  pub fn exists(&self, item: &ItemId, platforms: &PlatformSet) -> bool {
    self.queue.exists(item, platforms, &self.ledger)
  }

  pub(crate) fn is_never_cook(&self, item: &ItemId) -> bool {
    self.never_cook.iter().any(|dir| item.is_under(dir))
  }

  /// Forgets a source change's previous output. While a session runs, the item is
  /// re-queued for the platforms it had been produced for.
  ///
  /// An item suspended mid-preparation holds content loaded from the old source;
  /// that state is dropped and the item is re-queued so it loads again.
  pub fn invalidate(&mut self, item: &ItemId) -> bool {
    let mut requeue = self.ledger.invalidate(item);
    self.uncooked_editor_only.remove(item);
    if let Some(state) = self.reentry.remove(item) {
      debug!(item = %item, "dropped suspended preparation of invalidated item");
      self.arena.release(state.handle);
      requeue.extend(state.platforms);
    }
    debug!(item = %item, platforms = requeue.len(), "invalidated cooked item");
    if self.running && !requeue.is_empty() {
      self.queue.enqueue(item.clone(), requeue, false);
      return true;
    }
    false
  }

  /// Takes the items cooked for `platform` that were not announced yet, leaving out
  /// `except` (the item the caller asked for itself).
  pub fn drain_unsolicited(&mut self, platform: &Platform, except: Option<&ItemId>) -> Vec<ItemId> {
    let mut drained = self.unsolicited.remove(platform).unwrap_or_default();
    if let Some(except) = except {
      drained.retain(|item| item != except);
    }
    drained
  }

  /// Flag another thread can set to stop the run at the next tick boundary.
  pub fn cancel_handle(&self) -> Arc<AtomicBool> {
    Arc::clone(&self.cancel)
  }

  pub fn request_cancel(&self) {
    self.cancel.store(true, Ordering::SeqCst);
  }

  pub fn is_cancel_requested(&self) -> bool {
    self.cancel.load(Ordering::SeqCst)
  }

  /// Stops the current session. Pending work is kept as the previous requests of
  /// the next by-the-book start.
  pub fn cancel(&mut self) {
    let pending = self.queue.drain_all();
    info!(pending = pending.len(), "cook cancelled");
    for (_, state) in self.reentry.drain() {
      self.arena.release(state.handle);
    }
    self.previous_requests.extend(pending);
    self.report.cancelled = true;
    self.running = false;
    self.cancel.store(false, Ordering::SeqCst);
  }

  pub(crate) fn take_previous_requests(&mut self) -> Vec<BuildRequest> {
    std::mem::take(&mut self.previous_requests)
  }

  pub fn previous_requests(&self) -> &[BuildRequest] {
    &self.previous_requests
  }

  /// Runs a reclamation pass and reports what survived.
  pub fn reclaim(&mut self, reason: ReclaimReason) -> ReclaimStats {
    let pinned: HashSet<Handle> = self.reentry.values().map(|state| state.handle).collect();
    let stats = self.governor.reclaim(&mut self.arena, reason, &pinned);
    for handle in &stats.leaked {
      if let Some(item) = self.arena.get(*handle) {
        warn!(item = %item.id(), "loaded item leaked across reclamation");
      }
    }
    self.report.reclaims += 1;
    self.events.publish(CookEvent::Reclaimed {
      freed: stats.freed,
      leaked: stats.leaked.len(),
    });
    stats
  }

  pub(crate) fn idle_reclaim_due(&self) -> bool {
    self.governor.idle_reclaim_due(&self.arena)
  }

  /// Queued or suspended work remains.
  pub fn has_work(&self) -> bool {
    !self.queue.is_empty() || !self.reentry.is_empty()
  }

  pub fn fingerprints(&self) -> BTreeMap<Platform, ConfigFingerprint> {
    self
      .platforms
      .iter()
      .map(|p| (p.clone(), ConfigFingerprint::compute(&self.config.platform(p))))
      .collect()
  }

  pub fn is_running(&self) -> bool {
    self.running
  }

  pub(crate) fn begin_session(&mut self) -> Result<(), CookError> {
    if self.running {
      return Err(CookError::AlreadyRunning);
    }
    self.running = true;
    self.started = Some(Instant::now());
    self.report = RunReport::default();
    for (platform, fingerprint) in self.fingerprints() {
      self.report.fingerprints.insert(platform.name().to_string(), fingerprint.digest());
    }
    Ok(())
  }

  /// Ends the session and hands back its report.
  pub(crate) fn end_session(&mut self) -> RunReport {
    self.running = false;
    let mut report = std::mem::take(&mut self.report);
    if let Some(started) = self.started.take() {
      report.elapsed_ms = started.elapsed().as_millis() as u64;
    }
    report
  }

  /// Records `outcome` for every platform in `platforms` that has no record yet.
  pub(crate) fn record_unset(&mut self, item: &ItemId, platforms: &PlatformSet, outcome: CookOutcome) {
    for platform in platforms {
      if !self.ledger.is_cooked(item, platform) {
        self.ledger.record(item, platform, outcome);
      }
    }
  }
}
