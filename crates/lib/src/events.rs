//! Typed "file ready" notifications.
//!
//! The coordinating loop publishes [`CookEvent`]s; the CLI reporter and the network
//! session subscribe with plain `mpsc` receivers. Subscribers that hang up are dropped
//! on the next publish.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender, channel};

use crate::executor::ExecutorState;
use crate::item::ItemId;
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq)]
pub enum CookEvent {
  /// One platform artifact was written.
  FileReady {
    item: ItemId,
    platform: Platform,
    path: PathBuf,
  },
  /// The executor is done with a requested item, in its final state.
  ItemFinished { item: ItemId, state: ExecutorState },
  Reclaimed { freed: usize, leaked: usize },
  ChildFinished { index: usize, success: bool },
}

#[derive(Debug, Default)]
pub struct EventBus {
  subscribers: Vec<Sender<CookEvent>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe(&mut self) -> Receiver<CookEvent> {
    let (tx, rx) = channel();
    self.subscribers.push(tx);
    rx
  }

  pub fn publish(&mut self, event: CookEvent) {
    if self.subscribers.is_empty() {
      return;
    }
    self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
  }

  pub fn subscriber_count(&self) -> usize {
    self.subscribers.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_subscriber_receives_events() {
    let mut bus = EventBus::new();
    let a = bus.subscribe();
    let b = bus.subscribe();
    bus.publish(CookEvent::Reclaimed { freed: 1, leaked: 0 });
    assert_eq!(a.try_recv().unwrap(), CookEvent::Reclaimed { freed: 1, leaked: 0 });
    assert_eq!(b.try_recv().unwrap(), CookEvent::Reclaimed { freed: 1, leaked: 0 });
  }

  #[test]
  fn dropped_subscribers_are_pruned() {
    let mut bus = EventBus::new();
    let kept = bus.subscribe();
    drop(bus.subscribe());
    bus.publish(CookEvent::ChildFinished { index: 0, success: true });
    assert_eq!(bus.subscriber_count(), 1);
    assert!(kept.try_recv().is_ok());
  }
}
