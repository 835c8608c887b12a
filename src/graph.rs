//! The graph model: cycle-safe directed acyclic multigraphs over [`NodeConfig`] and
//! [`Executor`](crate::executor::Executor).
//!
//! Built on `petgraph::stable_graph::StableDiGraph` rather than the plain `DiGraph`, since this
//! graph needs node and edge *removal* (`removeEdge`, `removeNode`) without invalidating the
//! indices of everything else, unlike a build-only query graph that only ever grows.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::config::NodeConfig;
use crate::error::PlanError;
use crate::executor::Executor;

/// Returns `true` if adding an edge `from -> to` to `graph` would create a cycle, i.e. if `to` can
/// already reach `from`.
fn would_cycle<N, E>(graph: &StableDiGraph<N, E>, from: NodeIndex, to: NodeIndex) -> bool {
    from == to || petgraph::algo::has_path_connecting(graph, to, from, None)
}

/// Directed acyclic multigraph over [`NodeConfig`] (the `ConfigGraph`). Edges point
/// parent → child, where the parent is upstream and receives results from the child.
#[derive(Debug, Default)]
pub struct ConfigGraph {
    graph: StableDiGraph<NodeConfig, ()>,
    by_id: IndexMap<String, NodeIndex>,
    /// Always exactly `{n | n is a DataSourceConfig}`.
    source_nodes: IndexSet<NodeIndex>,
}

impl ConfigGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&NodeConfig> {
        self.graph.node_weight(idx)
    }

    pub fn find_id(&self, id: &str) -> Option<NodeIndex> {
        self.by_id.get(id).copied()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Nodes with no predecessors, i.e. the context sentinel's fan-in entry points.
    pub fn roots(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph
            .node_indices()
            .filter(move |&idx| self.predecessors(idx).next().is_none())
    }

    /// Upstream neighbors (parents) of `idx`.
    pub fn predecessors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Incoming)
    }

    /// Downstream neighbors (children) of `idx`.
    pub fn successors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Outgoing)
    }

    pub fn source_nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.source_nodes.iter().copied()
    }

    fn is_orphan(&self, idx: NodeIndex) -> bool {
        self.predecessors(idx).next().is_none() && self.successors(idx).next().is_none()
    }

    fn track_if_source(&mut self, idx: NodeIndex) {
        if self.graph[idx].is_data_source() {
            self.source_nodes.insert(idx);
        }
    }

    fn untrack_source(&mut self, idx: NodeIndex) {
        self.source_nodes.shift_remove(&idx);
    }

    /// Inserts a new node. Fails with [`PlanError::DuplicateId`] if a node with the same id
    /// already exists.
    pub fn add_node(&mut self, cfg: NodeConfig) -> Result<NodeIndex, PlanError> {
        let id = cfg.id().to_owned();
        if self.by_id.contains_key(&id) {
            return Err(PlanError::DuplicateId { id });
        }
        let is_source = cfg.is_data_source();
        let idx = self.graph.add_node(cfg);
        self.by_id.insert(id, idx);
        if is_source {
            self.source_nodes.insert(idx);
        }
        Ok(idx)
    }

    /// Inserts an edge `from -> to` (parent → child). Returns whether the edge was newly added;
    /// adding an already-present edge is a no-op that returns `Ok(false)`. Fails with
    /// [`PlanError::CycleError`] if the edge would create a cycle, leaving the graph unchanged.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> Result<bool, PlanError> {
        if self.graph.find_edge(from, to).is_some() {
            return Ok(false);
        }
        if would_cycle(&self.graph, from, to) {
            return Err(PlanError::CycleError {
                from: self.id_of(from),
                to: self.id_of(to),
            });
        }
        self.graph.add_edge(from, to, ());
        self.track_if_source(from);
        self.track_if_source(to);
        Ok(true)
    }

    fn id_of(&self, idx: NodeIndex) -> String {
        self.graph
            .node_weight(idx)
            .map(|n| n.id().to_owned())
            .unwrap_or_default()
    }

    /// Removes the edge `from -> to`, if present, returning whether a removal occurred. An
    /// endpoint that becomes orphaned (no predecessors and no successors) is dropped from the
    /// graph entirely, and from `source_nodes` if it was a data source.
    pub fn remove_edge(&mut self, from: NodeIndex, to: NodeIndex) -> bool {
        let Some(edge) = self.graph.find_edge(from, to) else {
            return false;
        };
        self.graph.remove_edge(edge);
        for idx in [from, to] {
            if self.graph.node_weight(idx).is_some() && self.is_orphan(idx) {
                self.drop_node(idx);
            }
        }
        true
    }

    fn drop_node(&mut self, idx: NodeIndex) {
        if let Some(cfg) = self.graph.remove_node(idx) {
            self.by_id.shift_remove(cfg.id());
        }
        self.untrack_source(idx);
    }

    /// Drops a node and all incident edges, returning whether it was present.
    pub fn remove_node(&mut self, idx: NodeIndex) -> bool {
        if self.graph.node_weight(idx).is_none() {
            return false;
        }
        self.drop_node(idx);
        true
    }

    /// Atomically swaps `old` for `new_cfg`: detaches `old`, inserts `new_cfg`, and reattaches the
    /// same edges with the same orientation. Invariant-preserving on success (`pred(new) =
    /// pred(old)`, `succ(new) = succ(old)`); on a cycle error the reattachment is left partially
    /// applied, leaving the planner in an unrecoverable state for this call.
    pub fn replace(&mut self, old: NodeIndex, new_cfg: NodeConfig) -> Result<NodeIndex, PlanError> {
        let preds: Vec<NodeIndex> = self.predecessors(old).collect();
        let succs: Vec<NodeIndex> = self.successors(old).collect();

        let new_id = new_cfg.id().to_owned();
        if self.by_id.get(&new_id).is_some_and(|&idx| idx != old) {
            return Err(PlanError::DuplicateId { id: new_id });
        }

        if let Some(cfg) = self.graph.remove_node(old) {
            self.by_id.shift_remove(cfg.id());
        }
        self.untrack_source(old);

        let is_source = new_cfg.is_data_source();
        let new_idx = self.graph.add_node(new_cfg);
        self.by_id.insert(new_id, new_idx);
        if is_source {
            self.source_nodes.insert(new_idx);
        }

        for p in preds {
            if would_cycle(&self.graph, p, new_idx) {
                return Err(PlanError::CycleError {
                    from: self.id_of(p),
                    to: self.id_of(new_idx),
                });
            }
            self.graph.add_edge(p, new_idx, ());
        }
        for s in succs {
            if would_cycle(&self.graph, new_idx, s) {
                return Err(PlanError::CycleError {
                    from: self.id_of(new_idx),
                    to: self.id_of(s),
                });
            }
            self.graph.add_edge(new_idx, s, ());
        }
        Ok(new_idx)
    }

    /// Rebuilds `source_nodes` from scratch by scanning every node, after factory setup.
    pub fn rebuild_source_nodes(&mut self) {
        self.source_nodes = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph[idx].is_data_source())
            .collect();
    }

    /// A read-only snapshot of the current vertex/edge sets, used by the factory setup driver to
    /// detect whether a factory mutated the graph.
    pub(crate) fn snapshot(&self) -> GraphSnapshot {
        let edges: IndexSet<(NodeIndex, NodeIndex)> = self
            .graph
            .edge_references()
            .map(|e| (e.source(), e.target()))
            .collect();
        GraphSnapshot {
            node_ids: self.by_id.clone(),
            edges,
        }
    }

    pub(crate) fn changed_since(&self, snapshot: &GraphSnapshot) -> bool {
        self.snapshot() != *snapshot
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GraphSnapshot {
    node_ids: IndexMap<String, NodeIndex>,
    edges: IndexSet<(NodeIndex, NodeIndex)>,
}

/// Directed acyclic multigraph over [`Executor`] instances (the `ExecutorGraph`), same edge
/// direction convention as [`ConfigGraph`].
#[derive(Debug, Default)]
pub struct ExecutorGraph {
    graph: StableDiGraph<Arc<dyn Executor>, ()>,
}

impl ExecutorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, executor: Arc<dyn Executor>) -> NodeIndex {
        self.graph.add_node(executor)
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&Arc<dyn Executor>> {
        self.graph.node_weight(idx)
    }

    pub fn successors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Outgoing)
    }

    /// Inserts an edge `from -> to`, failing with [`PlanError::CycleError`] if it would create a
    /// cycle.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> Result<(), PlanError> {
        if self.graph.find_edge(from, to).is_some() {
            return Ok(());
        }
        if would_cycle(&self.graph, from, to) {
            let id = |idx: NodeIndex| {
                self.graph
                    .node_weight(idx)
                    .map(|n| n.config().id().to_owned())
                    .unwrap_or_default()
            };
            return Err(PlanError::CycleError {
                from: id(from),
                to: id(to),
            });
        }
        self.graph.add_edge(from, to, ());
        Ok(())
    }

    pub fn is_acyclic(&self) -> bool {
        !petgraph::algo::is_cyclic_directed(&self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorSpec;

    fn op(id: &str) -> NodeConfig {
        NodeConfig::operator(OperatorSpec {
            id: id.to_owned(),
            ..Default::default()
        })
    }

    #[test]
    fn add_edge_detects_cycle_and_leaves_graph_unchanged() {
        let mut g = ConfigGraph::new();
        let a = g.add_node(op("a")).unwrap();
        let b = g.add_node(op("b")).unwrap();
        let c = g.add_node(op("c")).unwrap();
        g.add_edge(a, b).unwrap();
        g.add_edge(b, c).unwrap();

        let before = g.snapshot();
        let err = g.add_edge(c, a).unwrap_err();
        assert_eq!(
            err,
            PlanError::CycleError {
                from: "c".into(),
                to: "a".into()
            }
        );
        assert!(!g.changed_since(&before));
    }

    #[test]
    fn add_edge_rejects_self_loop() {
        let mut g = ConfigGraph::new();
        let a = g.add_node(op("a")).unwrap();
        assert!(g.add_edge(a, a).is_err());
    }

    #[test]
    fn add_then_remove_same_edge_is_identity() {
        let mut g = ConfigGraph::new();
        let a = g.add_node(op("a")).unwrap();
        let b = g.add_node(op("b")).unwrap();
        g.add_edge(a, b).unwrap();
        let before = g.snapshot();
        // re-adding is a no-op
        assert!(!g.add_edge(a, b).unwrap());
        assert!(!g.changed_since(&before));

        assert!(g.remove_edge(a, b));
        // both endpoints are now orphaned and get dropped
        assert!(g.find_id("a").is_none());
        assert!(g.find_id("b").is_none());
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut g = ConfigGraph::new();
        g.add_node(op("a")).unwrap();
        assert_eq!(
            g.add_node(op("a")).unwrap_err(),
            PlanError::DuplicateId { id: "a".into() }
        );
    }

    #[test]
    fn replace_preserves_neighbor_sets() {
        let mut g = ConfigGraph::new();
        let a = g.add_node(op("a")).unwrap();
        let b = g.add_node(op("b")).unwrap();
        let c = g.add_node(op("c")).unwrap();
        g.add_edge(a, b).unwrap();
        g.add_edge(b, c).unwrap();

        let new_b = g.replace(b, op("b2")).unwrap();
        assert_eq!(g.predecessors(new_b).collect::<Vec<_>>(), vec![a]);
        assert_eq!(g.successors(new_b).collect::<Vec<_>>(), vec![c]);
        assert_eq!(g.predecessors(c).collect::<Vec<_>>(), vec![new_b]);
        assert_eq!(g.successors(a).collect::<Vec<_>>(), vec![new_b]);
    }

    #[test]
    fn source_nodes_tracks_data_sources() {
        let mut g = ConfigGraph::new();
        let src = g
            .add_node(NodeConfig::operator(OperatorSpec {
                id: "src".into(),
                data_source: Some(crate::config::DataSourceSpec {
                    source_id: "influx".into(),
                    ..Default::default()
                }),
                ..Default::default()
            }))
            .unwrap();
        let a = g.add_node(op("a")).unwrap();
        g.add_edge(a, src).unwrap();
        assert_eq!(g.source_nodes().collect::<Vec<_>>(), vec![src]);

        g.remove_node(a);
        assert!(g.source_nodes().collect::<Vec<_>>().contains(&src));
    }
}
