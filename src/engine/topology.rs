//! Declarative graph wiring
//!
//! Routing components describe the connections they want as a [`Topology`]
//! computed from their state. A [`Wiring`] holds the connections currently
//! in force and reconciles them against a desired topology in one pass:
//! every stale edge is removed and every missing edge is added, so no
//! connection from an earlier layout survives a rebuild.

use std::collections::BTreeSet;
use std::fmt::Debug;

/// A set of directed node-to-node connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology<N: Ord + Copy> {
    edges: BTreeSet<(N, N)>,
}

impl<N: Ord + Copy + Debug> Default for Topology<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Ord + Copy + Debug> Topology<N> {
    pub fn new() -> Self {
        Self {
            edges: BTreeSet::new(),
        }
    }

    /// Add one connection
    pub fn connect(&mut self, from: N, to: N) -> &mut Self {
        self.edges.insert((from, to));
        self
    }

    /// Connect `nodes` in series: nodes[0] -> nodes[1] -> ...
    pub fn chain(&mut self, nodes: &[N]) -> &mut Self {
        for pair in nodes.windows(2) {
            self.edges.insert((pair[0], pair[1]));
        }
        self
    }

    pub fn contains(&self, from: N, to: N) -> bool {
        self.edges.contains(&(from, to))
    }

    pub fn edges(&self) -> impl Iterator<Item = &(N, N)> {
        self.edges.iter()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Nodes fed directly by `node`, in node order
    pub fn successors(&self, node: N) -> Vec<N> {
        self.edges
            .iter()
            .filter(|(from, _)| *from == node)
            .map(|(_, to)| *to)
            .collect()
    }

    /// Find a path from `from` to `to`, both ends included
    ///
    /// Depth-first in node order; returns None when `to` is unreachable.
    pub fn path(&self, from: N, to: N) -> Option<Vec<N>> {
        let mut visited = BTreeSet::new();
        let mut path = vec![from];
        if self.search(from, to, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn search(&self, node: N, to: N, visited: &mut BTreeSet<N>, path: &mut Vec<N>) -> bool {
        if node == to {
            return true;
        }
        if !visited.insert(node) {
            return false;
        }
        for next in self.successors(node) {
            path.push(next);
            if self.search(next, to, visited, path) {
                return true;
            }
            path.pop();
        }
        false
    }
}

/// Edges to drop and edges to create when moving between two topologies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDiff<N> {
    pub removed: Vec<(N, N)>,
    pub added: Vec<(N, N)>,
}

impl<N> TopologyDiff<N> {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Live wiring of one routing component
#[derive(Debug, Clone)]
pub struct Wiring<N: Ord + Copy> {
    current: Topology<N>,
}

impl<N: Ord + Copy + Debug> Default for Wiring<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Ord + Copy + Debug> Wiring<N> {
    pub fn new() -> Self {
        Self {
            current: Topology::new(),
        }
    }

    pub fn current(&self) -> &Topology<N> {
        &self.current
    }

    /// Replace the live wiring with `desired` and report what changed
    pub fn reconcile(&mut self, desired: Topology<N>) -> TopologyDiff<N> {
        let removed = self
            .current
            .edges
            .difference(&desired.edges)
            .copied()
            .collect();
        let added = desired
            .edges
            .difference(&self.current.edges)
            .copied()
            .collect();
        self.current = desired;
        TopologyDiff { removed, added }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum Node {
        In,
        A,
        B,
        Out,
    }

    #[test]
    fn test_chain_builds_series_edges() {
        let mut topology = Topology::new();
        topology.chain(&[Node::In, Node::A, Node::B, Node::Out]);
        assert_eq!(topology.len(), 3);
        assert!(topology.contains(Node::A, Node::B));
        assert!(!topology.contains(Node::In, Node::B));
    }

    #[test]
    fn test_path_follows_edges() {
        let mut topology = Topology::new();
        topology.chain(&[Node::In, Node::B, Node::Out]);
        assert_eq!(
            topology.path(Node::In, Node::Out),
            Some(vec![Node::In, Node::B, Node::Out])
        );
        assert_eq!(topology.path(Node::Out, Node::In), None);
    }

    #[test]
    fn test_reconcile_removes_stale_edges() {
        let mut wiring = Wiring::new();
        let mut first = Topology::new();
        first.chain(&[Node::In, Node::A, Node::B, Node::Out]);
        let diff = wiring.reconcile(first);
        assert_eq!(diff.added.len(), 3);
        assert!(diff.removed.is_empty());

        let mut second = Topology::new();
        second.chain(&[Node::In, Node::B, Node::Out]);
        let diff = wiring.reconcile(second);
        assert_eq!(diff.removed, vec![(Node::In, Node::A), (Node::A, Node::B)]);
        assert_eq!(diff.added, vec![(Node::In, Node::B)]);
        assert!(!wiring.current().contains(Node::A, Node::B));
    }

    #[test]
    fn test_reconcile_same_topology_is_noop() {
        let mut wiring = Wiring::new();
        let mut topology = Topology::new();
        topology.connect(Node::In, Node::Out);
        wiring.reconcile(topology.clone());
        assert!(wiring.reconcile(topology).is_empty());
    }
}
