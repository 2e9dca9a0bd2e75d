//! Monitor waits-for graph and cycle detection.
//!
//! Nodes are monitors. While a thread that already holds monitors is blocked
//! acquiring another, the engine keeps one edge from the thread's most
//! recently acquired monitor to the requested one. Edges are refcounted so
//! two threads blocked on the same pair share a single edge. A cycle in this
//! graph is a resource deadlock: every owner of a cycle monitor is stuck
//! behind another owner in the same cycle.

use crate::types::MonitorId;
use crate::util::{DetHashMap, DetHashSet};
use smallvec::SmallVec;

#[derive(Debug, Default)]
pub(crate) struct WaitGraph {
    /// Adjacency with edge refcounts, in insertion order per node.
    edges: DetHashMap<MonitorId, SmallVec<[(MonitorId, u32); 2]>>,
}

impl WaitGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers one waits-for edge `from -> to`.
    pub(crate) fn add_edge(&mut self, from: MonitorId, to: MonitorId) {
        let out = self.edges.entry(from).or_default();
        if let Some(entry) = out.iter_mut().find(|(m, _)| *m == to) {
            entry.1 += 1;
        } else {
            out.push((to, 1));
        }
    }

    /// Drops one registration of the edge `from -> to`.
    pub(crate) fn remove_edge(&mut self, from: MonitorId, to: MonitorId) {
        let Some(out) = self.edges.get_mut(&from) else {
            return;
        };
        if let Some(pos) = out.iter().position(|(m, _)| *m == to) {
            out[pos].1 -= 1;
            if out[pos].1 == 0 {
                out.remove(pos);
            }
        }
        if out.is_empty() {
            self.edges.remove(&from);
        }
    }

    /// Looks for a cycle through the just-added edge `from -> to`: a path
    /// from `to` back to `from`. Returns the cycle's monitors in path order,
    /// starting at `from`.
    pub(crate) fn cycle_through(&self, from: MonitorId, to: MonitorId) -> Option<Vec<MonitorId>> {
        if from == to {
            return Some(vec![from]);
        }
        let mut visited = DetHashSet::default();
        let mut path = vec![to];
        if self.reaches(to, from, &mut visited, &mut path) {
            let mut cycle = vec![from];
            cycle.extend(path);
            cycle.pop(); // the closing `from` is already at the front
            Some(cycle)
        } else {
            None
        }
    }

    fn reaches(
        &self,
        node: MonitorId,
        goal: MonitorId,
        visited: &mut DetHashSet<MonitorId>,
        path: &mut Vec<MonitorId>,
    ) -> bool {
        if !visited.insert(node) {
            return false;
        }
        let Some(out) = self.edges.get(&node) else {
            return false;
        };
        for &(next, _) in out {
            path.push(next);
            if next == goal || self.reaches(next, goal, visited, path) {
                return true;
            }
            path.pop();
        }
        false
    }

    #[cfg(test)]
    fn edge_count(&self) -> usize {
        self.edges.values().map(SmallVec::len).sum()
    }
}
