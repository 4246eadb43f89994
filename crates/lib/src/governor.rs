//! Memory governor for heavyweight loaded items.
//!
//! Loaded items live in a generation-indexed [`Arena`]. The executor holds a
//! reference while it works on an item and releases it once the item is saved; the
//! slot stays live until the governor decides to reclaim. A reclamation pass frees
//! every unreferenced slot and bumps its generation so stale handles stop resolving.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

/// Stable reference to an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
  index: u32,
  generation: u32,
}

struct Slot<T> {
  generation: u32,
  value: Option<T>,
  refs: u32,
  bytes: u64,
}

pub struct Arena<T> {
  slots: Vec<Slot<T>>,
  free: Vec<u32>,
  live: usize,
  live_bytes: u64,
}

impl<T> Default for Arena<T> {
  fn default() -> Self {
    Self {
      slots: Vec::new(),
      free: Vec::new(),
      live: 0,
      live_bytes: 0,
    }
  }
}

impl<T> Arena<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Stores `value` with one reference held by the caller.
  pub fn insert(&mut self, value: T, bytes: u64) -> Handle {
    self.live += 1;
    self.live_bytes += bytes;
    if let Some(index) = self.free.pop() {
      let slot = &mut self.slots[index as usize];
      slot.value = Some(value);
      slot.refs = 1;
      slot.bytes = bytes;
      return Handle {
        index,
        generation: slot.generation,
      };
    }
    let index = self.slots.len() as u32;
    self.slots.push(Slot {
      generation: 0,
      value: Some(value),
      refs: 1,
      bytes,
    });
    Handle { index, generation: 0 }
  }

  fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
    self
      .slots
      .get(handle.index as usize)
      .filter(|s| s.generation == handle.generation && s.value.is_some())
  }

  fn slot_mut(&mut self, handle: Handle) -> Option<&mut Slot<T>> {
    self
      .slots
      .get_mut(handle.index as usize)
      .filter(|s| s.generation == handle.generation && s.value.is_some())
  }

  pub fn get(&self, handle: Handle) -> Option<&T> {
    self.slot(handle).and_then(|s| s.value.as_ref())
  }

  pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
    self.slot_mut(handle).and_then(|s| s.value.as_mut())
  }

  pub fn contains(&self, handle: Handle) -> bool {
    self.slot(handle).is_some()
  }

  /// Drops a reference. The value stays live until the next [`Arena::sweep`].
  pub fn release(&mut self, handle: Handle) -> bool {
    match self.slot_mut(handle) {
      Some(slot) if slot.refs > 0 => {
        slot.refs -= 1;
        true
      }
      _ => false,
    }
  }

  pub fn refs(&self, handle: Handle) -> u32 {
    self.slot(handle).map_or(0, |s| s.refs)
  }

  pub fn live(&self) -> usize {
    self.live
  }

  pub fn live_bytes(&self) -> u64 {
    self.live_bytes
  }

  /// Live slots without references, i.e. what the next sweep would free.
  pub fn releasable(&self) -> usize {
    self.slots.iter().filter(|s| s.value.is_some() && s.refs == 0).count()
  }

  pub fn live_handles(&self) -> Vec<Handle> {
    self
      .slots
      .iter()
      .enumerate()
      .filter(|(_, s)| s.value.is_some())
      .map(|(index, s)| Handle {
        index: index as u32,
        generation: s.generation,
      })
      .collect()
  }

  /// Frees every slot without references. Returns how many were freed.
  pub fn sweep(&mut self) -> usize {
    let mut freed = 0;
    for (index, slot) in self.slots.iter_mut().enumerate() {
      if slot.value.is_some() && slot.refs == 0 {
        slot.value = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.live -= 1;
        self.live_bytes -= slot.bytes;
        slot.bytes = 0;
        self.free.push(index as u32);
        freed += 1;
      }
    }
    freed
  }
}

#[derive(Debug, Clone)]
pub struct GovernorConfig {
  /// Reclaim after this many items were processed; zero disables.
  pub packages_per_reclaim: usize,
  pub idle_threshold: Duration,
  /// Ceiling on live handles; zero disables.
  pub max_live_objects: usize,
  /// Ceiling on live bytes; zero disables.
  pub max_memory_bytes: u64,
  pub leak_test: bool,
}

impl Default for GovernorConfig {
  fn default() -> Self {
    Self {
      packages_per_reclaim: 50,
      idle_threshold: Duration::from_secs(20),
      max_live_objects: 0,
      max_memory_bytes: 8 * 1024 * 1024 * 1024,
      leak_test: false,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimReason {
  ObjectCeiling,
  MemoryCeiling,
  PackageInterval,
  Idle,
  /// An item asked for a full pass after it was processed.
  Requested,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReclaimStats {
  pub freed: usize,
  pub survivors: usize,
  /// Survivors not present after the previous pass. Only filled in leak-test mode.
  #[serde(skip)]
  pub leaked: Vec<Handle>,
}

pub struct MemoryGovernor {
  config: GovernorConfig,
  processed_since_reclaim: usize,
  full_requested: bool,
  last_progress: Instant,
  last_survivors: HashSet<Handle>,
}

impl MemoryGovernor {
  pub fn new(config: GovernorConfig) -> Self {
    Self {
      config,
      processed_since_reclaim: 0,
      full_requested: false,
      last_progress: Instant::now(),
      last_survivors: HashSet::new(),
    }
  }

  pub fn config(&self) -> &GovernorConfig {
    &self.config
  }

  pub fn note_processed(&mut self) {
    self.processed_since_reclaim += 1;
    self.last_progress = Instant::now();
  }

  pub fn request_full_reclaim(&mut self) {
    self.full_requested = true;
  }

  /// Clearance check before the next item starts. `Some` means reclaim first.
  ///
  /// Clearance is never withheld when a sweep could not free anything, so items
  /// pinned across ticks cannot stall the loop at a ceiling.
  pub fn reclaim_reason<T>(&self, arena: &Arena<T>) -> Option<ReclaimReason> {
    if arena.releasable() == 0 {
      return None;
    }
    if self.full_requested {
      return Some(ReclaimReason::Requested);
    }
    if self.config.max_live_objects > 0 && arena.live() >= self.config.max_live_objects {
      return Some(ReclaimReason::ObjectCeiling);
    }
    if self.config.max_memory_bytes > 0 && arena.live_bytes() >= self.config.max_memory_bytes {
      return Some(ReclaimReason::MemoryCeiling);
    }
    if self.config.packages_per_reclaim > 0 && self.processed_since_reclaim >= self.config.packages_per_reclaim {
      return Some(ReclaimReason::PackageInterval);
    }
    None
  }

  /// True when nothing progressed for the idle threshold and something could be freed.
  pub fn idle_reclaim_due<T>(&self, arena: &Arena<T>) -> bool {
    arena.releasable() > 0 && self.last_progress.elapsed() >= self.config.idle_threshold
  }

  /// Runs a full reclamation pass over `arena`. Handles in `pinned` are held by
  /// suspended work and are never reported as leaks.
  pub fn reclaim<T>(&mut self, arena: &mut Arena<T>, reason: ReclaimReason, pinned: &HashSet<Handle>) -> ReclaimStats {
    let freed = arena.sweep();
    let survivors: HashSet<Handle> = arena.live_handles().into_iter().collect();

    let mut leaked = Vec::new();
    if self.config.leak_test {
      leaked = survivors
        .difference(&self.last_survivors)
        .filter(|handle| !pinned.contains(*handle))
        .copied()
        .collect();
      leaked.sort();
      for handle in &leaked {
        warn!(?handle, "heavyweight object survived reclamation");
      }
    }

    info!(?reason, freed, survivors = survivors.len(), "reclaimed loaded items");
    self.last_survivors = survivors;
    self.processed_since_reclaim = 0;
    self.full_requested = false;
    self.last_progress = Instant::now();

    ReclaimStats {
      freed,
      survivors: self.last_survivors.len(),
      leaked,
    }
  }
}
