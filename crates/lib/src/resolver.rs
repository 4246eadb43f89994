//! Dependency expansion over the read-only dependency index.
//!
//! The resolver only produces item lists. It seeds the request queue and the
//! distribution partitions but never touches the ledger.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use tracing::{debug, warn};

use crate::item::{DependencyIndex, ItemId};

/// Breadth-first transitive closure of `roots`, visiting each item once.
///
/// Roots come first in their given order, followed by dependencies level by level.
/// Edges into script packages are skipped. Items that do not resolve to a source
/// file are kept but logged, since loading them will fail and be reported.
pub fn expand(index: &dyn DependencyIndex, roots: &[ItemId]) -> Vec<ItemId> {
  let mut order = Vec::new();
  let mut visited: HashSet<ItemId> = HashSet::new();
  let mut pending: VecDeque<ItemId> = VecDeque::new();

  for root in roots {
    if visited.insert(root.clone()) {
      pending.push_back(root.clone());
    }
  }

  while let Some(item) = pending.pop_front() {
    if index.source_path(&item).is_none() {
      warn!(item = %item, "unable to resolve item to a source file");
    }
    for dependency in index.dependencies(&item).unwrap_or_default() {
      if dependency.is_script() {
        continue;
      }
      if visited.insert(dependency.clone()) {
        pending.push_back(dependency);
      }
    }
    order.push(item);
  }

  debug!(roots = roots.len(), expanded = order.len(), "expanded dependencies");
  order
}

/// `items` stably reordered so that items with more transitive dependents inside
/// the list come first. Nothing outside `items` is added; callers expand first.
pub fn order_for_distribution(index: &dyn DependencyIndex, items: &[ItemId]) -> Vec<ItemId> {
  let expanded: Vec<&ItemId> = {
    let mut seen = HashSet::new();
    items.iter().filter(|item| seen.insert(*item)).collect()
  };

  let mut graph: DiGraph<usize, ()> = DiGraph::new();
  let nodes: HashMap<&ItemId, NodeIndex> = expanded
    .iter()
    .enumerate()
    .map(|(position, item)| (*item, graph.add_node(position)))
    .collect();

  for item in &expanded {
    for dependency in index.dependencies(item).unwrap_or_default() {
      if let (Some(&from), Some(&to)) = (nodes.get(item), nodes.get(&dependency)) {
        graph.update_edge(from, to, ());
      }
    }
  }

  let reversed = Reversed(&graph);
  let dependents: Vec<usize> = expanded
    .iter()
    .map(|item| {
      let mut count = 0;
      let mut dfs = Dfs::new(reversed, nodes[*item]);
      while dfs.next(reversed).is_some() {
        count += 1;
      }
      count - 1
    })
    .collect();

  let mut positions: Vec<usize> = (0..expanded.len()).collect();
  positions.sort_by_key(|&p| std::cmp::Reverse(dependents[p]));
  positions.into_iter().map(|p| (*expanded[p]).clone()).collect()
}
