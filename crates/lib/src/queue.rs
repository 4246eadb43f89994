//! De-duplicating, platform-merging request queue.
//!
//! At most one entry exists per item. Enqueueing an item that is already pending
//! unions the platform sets instead of adding a second entry, so two producers asking
//! for the same content never cause two builds.

use std::collections::{HashMap, VecDeque};

use crate::cache::CookedLedger;
use crate::item::ItemId;
use crate::platform::PlatformSet;

/// One item and the platforms it should be cooked for.
///
/// An empty platform set means "every platform of the session".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
  pub item: ItemId,
  pub platforms: PlatformSet,
}

impl BuildRequest {
  pub fn new(item: ItemId, platforms: PlatformSet) -> Self {
    Self { item, platforms }
  }
}

#[derive(Debug, Default)]
pub struct RequestQueue {
  order: VecDeque<ItemId>,
  pending: HashMap<ItemId, PlatformSet>,
}

impl RequestQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds or merges a request. Returns `true` when a new entry was created.
  ///
  /// With `front`, the entry (new or existing) moves to the head of the queue.
  pub fn enqueue(&mut self, item: ItemId, platforms: PlatformSet, front: bool) -> bool {
    if let Some(existing) = self.pending.get_mut(&item) {
      existing.extend(platforms);
      if front && self.order.front() != Some(&item) {
        self.order.retain(|queued| queued != &item);
        self.order.push_front(item);
      }
      return false;
    }

    self.pending.insert(item.clone(), platforms);
    if front {
      self.order.push_front(item);
    } else {
      self.order.push_back(item);
    }
    true
  }

  pub fn enqueue_request(&mut self, request: BuildRequest, front: bool) -> bool {
    self.enqueue(request.item, request.platforms, front)
  }

  pub fn dequeue(&mut self) -> Option<BuildRequest> {
    let item = self.order.pop_front()?;
    let platforms = self.pending.remove(&item).unwrap_or_default();
    Some(BuildRequest { item, platforms })
  }

  /// True when every platform in `platforms` is either pending here or already
  /// recorded in the ledger.
  pub fn exists(&self, item: &ItemId, platforms: &PlatformSet, ledger: &CookedLedger) -> bool {
    let pending = self.pending.get(item);
    platforms
      .iter()
      .all(|p| pending.is_some_and(|set| set.contains(p)) || ledger.is_cooked(item, p))
  }

  /// Drops a pending entry, returning its platforms.
  pub fn remove(&mut self, item: &ItemId) -> Option<PlatformSet> {
    let platforms = self.pending.remove(item)?;
    self.order.retain(|queued| queued != item);
    Some(platforms)
  }

  pub fn contains(&self, item: &ItemId) -> bool {
    self.pending.contains_key(item)
  }

  pub fn pending_platforms(&self, item: &ItemId) -> Option<&PlatformSet> {
    self.pending.get(item)
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  /// Items in dequeue order.
  pub fn items(&self) -> impl Iterator<Item = &ItemId> {
    self.order.iter()
  }

  /// Removes every entry, in dequeue order.
  pub fn drain_all(&mut self) -> Vec<BuildRequest> {
    let mut drained = Vec::with_capacity(self.order.len());
    while let Some(request) = self.dequeue() {
      drained.push(request);
    }
    drained
  }
}
