pub mod paths;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named build target (e.g. "Win64"), with its own sandbox and settings fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Platform(String);

impl Platform {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn name(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Ordered so that iteration, logging and command lines are deterministic.
pub type PlatformSet = BTreeSet<Platform>;

/// Parses a `+` or `,` separated list such as `Win64+Switch`.
pub fn parse_platform_list(list: &str) -> PlatformSet {
  list
    .split(['+', ','])
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(Platform::new)
    .collect()
}

/// Joins platforms with `+`, the form child workers receive on their command line.
pub fn join_platforms(platforms: &PlatformSet) -> String {
  platforms.iter().map(Platform::name).collect::<Vec<_>>().join("+")
}
