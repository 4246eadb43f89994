//! cooker-lib: incremental, platform-aware content cooking.
//!
//! The crate is organised around a single [`context::CookerContext`] that owns the
//! request queue, the cooked-record ledger and the memory governor:
//! - `queue`: de-duplicating, platform-merging request FIFO
//! - `resolver`: breadth-first dependency expansion and distribution ordering
//! - `cache`: cooked ledger, config fingerprints and sandbox invalidation
//! - `executor`: the per-item load / prepare / save state machine
//! - `distribute`: partitioning a batch across child worker processes
//! - `server`: the on-demand TCP service
//! - `governor`: heavyweight handle arena and reclamation policy
//! - `sandbox_lock`: cross-process exclusion on a sandbox root

pub mod cache;
pub mod config;
pub mod consts;
pub mod content;
pub mod context;
pub mod distribute;
pub mod events;
pub mod executor;
pub mod governor;
pub mod item;
pub mod platform;
pub mod queue;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod sandbox_lock;
pub mod server;
pub mod session;
pub mod util;
