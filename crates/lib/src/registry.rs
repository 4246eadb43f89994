//! Registry snapshot and dependency-graph export.
//!
//! The snapshot is a small little-endian binary file written per platform:
//!
//! ```text
//! magic  "CKRG"
//! u32    format version
//! u32    entry count
//! entry  string item, u32 dependency count, string dependency...
//! string u32 byte length, UTF-8 bytes
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::cache::CookedLedger;
use crate::item::{DependencyIndex, ItemId};
use crate::platform::Platform;
use crate::resolver::expand;
use crate::util::fs::write_atomic;

const MAGIC: &[u8; 4] = b"CKRG";
const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("not a registry snapshot (bad magic)")]
  BadMagic,

  #[error("unsupported registry version {0}")]
  UnsupportedVersion(u32),

  #[error("registry snapshot is truncated")]
  Truncated,

  #[error("registry snapshot contains invalid UTF-8")]
  InvalidUtf8,

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to encode dependency graph: {0}")]
  Json(#[from] serde_json::Error),
}

/// Cooked items of one platform and their direct dependencies.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
  pub entries: BTreeMap<ItemId, Vec<ItemId>>,
}

impl RegistrySnapshot {
  /// Snapshot of everything produced for `platform`.
  pub fn from_ledger(ledger: &CookedLedger, index: &dyn DependencyIndex, platform: &Platform) -> Self {
    let entries = ledger
      .produced_items(platform)
      .into_iter()
      .map(|item| {
        let deps = index.dependencies(&item).unwrap_or_default();
        (item, deps)
      })
      .collect();
    Self { entries }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
    for (item, deps) in &self.entries {
      write_str(&mut out, item.as_str());
      out.extend_from_slice(&(deps.len() as u32).to_le_bytes());
      for dep in deps {
        write_str(&mut out, dep.as_str());
      }
    }
    out
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, RegistryError> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.take(4)? != MAGIC {
      return Err(RegistryError::BadMagic);
    }
    let version = reader.u32()?;
    if version != VERSION {
      return Err(RegistryError::UnsupportedVersion(version));
    }

    let count = reader.u32()?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
      let item = ItemId::new(reader.string()?);
      let dep_count = reader.u32()?;
      let deps = (0..dep_count)
        .map(|_| reader.string().map(ItemId::new))
        .collect::<Result<Vec<_>, _>>()?;
      entries.insert(item, deps);
    }
    Ok(Self { entries })
  }

  /// Loads a snapshot, `None` when the file does not exist.
  pub fn load(path: &Path) -> Result<Option<Self>, RegistryError> {
    match std::fs::read(path) {
      Ok(bytes) => Self::decode(&bytes).map(Some),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(source) => Err(RegistryError::Read {
        path: path.to_path_buf(),
        source,
      }),
    }
  }

  pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
    write_atomic(path, self.encode()).map_err(|source| RegistryError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), entries = self.entries.len(), "registry snapshot written");
    Ok(())
  }
}

fn write_str(out: &mut Vec<u8>, s: &str) {
  out.extend_from_slice(&(s.len() as u32).to_le_bytes());
  out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  fn take(&mut self, len: usize) -> Result<&'a [u8], RegistryError> {
    let end = self.pos.checked_add(len).ok_or(RegistryError::Truncated)?;
    let slice = self.bytes.get(self.pos..end).ok_or(RegistryError::Truncated)?;
    self.pos = end;
    Ok(slice)
  }

  fn u32(&mut self) -> Result<u32, RegistryError> {
    let raw = self.take(4)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
  }

  fn string(&mut self) -> Result<&'a str, RegistryError> {
    let len = self.u32()? as usize;
    std::str::from_utf8(self.take(len)?).map_err(|_| RegistryError::InvalidUtf8)
  }
}

/// `{ map: [transitive dependencies...] }` for every map in `maps`.
pub fn dependency_graph(index: &dyn DependencyIndex, maps: &[ItemId]) -> BTreeMap<String, Vec<String>> {
  maps
    .iter()
    .map(|map| {
      let deps = expand(index, std::slice::from_ref(map))
        .into_iter()
        .filter(|item| item != map)
        .map(|item| item.as_str().to_string())
        .collect();
      (map.as_str().to_string(), deps)
    })
    .collect()
}

pub fn write_dependency_graph(path: &Path, graph: &BTreeMap<String, Vec<String>>) -> Result<(), RegistryError> {
  let json = serde_json::to_string_pretty(graph)?;
  write_atomic(path, json).map_err(|source| RegistryError::Write {
    path: path.to_path_buf(),
    source,
  })?;
  info!(path = %path.display(), maps = graph.len(), "dependency graph written");
  Ok(())
}
