//! The sink filter resolver: parses sink-filter directives, wires roots to the context node
//! during setup, and tracks which filters have been satisfied.

use indexmap::{IndexMap, IndexSet};
use petgraph::stable_graph::NodeIndex;

use crate::error::PlanError;
use crate::graph::ConfigGraph;

/// Parses one filter string of the shape `"nodeId"` or `"nodeId:sourceHint"`.
fn parse_filter(filter: &str) -> Result<(String, Option<String>), PlanError> {
    let invalid = || PlanError::InvalidFilter {
        filter: filter.to_owned(),
    };
    match filter.matches(':').count() {
        0 if !filter.is_empty() => Ok((filter.to_owned(), None)),
        1 => {
            let (id, hint) = filter.split_once(':').expect("exactly one colon");
            if id.is_empty() {
                return Err(invalid());
            }
            Ok((id.to_owned(), Some(hint.to_owned())))
        }
        _ => Err(invalid()),
    }
}

/// Resolves sink-filter directives against the config graph as the factory setup driver visits
/// each node.
#[derive(Debug, Default)]
pub struct SinkFilterResolver {
    /// `nodeId -> sourceHint`, parsed from the query's sink filters.
    filters: IndexMap<String, Option<String>>,
    satisfied: IndexSet<String>,
    /// Predecessor-less, unfiltered nodes recorded when filters exist but don't mention them:
    /// recorded as a root but not auto-wired.
    roots: IndexSet<String>,
}

impl SinkFilterResolver {
    /// Parses every filter string, failing with [`PlanError::InvalidFilter`] on the first
    /// malformed one.
    pub fn parse(filters: &[String]) -> Result<Self, PlanError> {
        let mut parsed = IndexMap::new();
        for filter in filters {
            let (id, hint) = parse_filter(filter)?;
            parsed.insert(id, hint);
        }
        Ok(Self {
            filters: parsed,
            satisfied: IndexSet::new(),
            roots: IndexSet::new(),
        })
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn roots(&self) -> &IndexSet<String> {
        &self.roots
    }

    /// Applies rooting/filter logic to a single node visited by the setup driver: if the node's
    /// id is a filter key, it is wired to the context node and marked satisfied regardless of
    /// whether it already has predecessors (the literal, possibly-redundant wiring, chosen over
    /// skipping already-wired nodes). Otherwise, if it has no predecessors, it is either
    /// auto-wired (no filters present) or recorded as an unwired root (filters present).
    pub fn visit(
        &mut self,
        graph: &mut ConfigGraph,
        context_idx: NodeIndex,
        node_idx: NodeIndex,
    ) -> Result<(), PlanError> {
        let id = graph
            .node(node_idx)
            .map(|n| n.id().to_owned())
            .unwrap_or_default();

        if self.filters.contains_key(&id) {
            graph.add_edge(context_idx, node_idx)?;
            self.satisfied.insert(id);
            return Ok(());
        }

        if graph.predecessors(node_idx).next().is_none() {
            if self.has_filters() {
                self.roots.insert(id);
            } else {
                graph.add_edge(context_idx, node_idx)?;
            }
        }
        Ok(())
    }

    /// Fails with the first [`PlanError::UnsatisfiedFilter`] found, if any filter key never
    /// matched a node.
    pub fn check_satisfied(&self) -> Result<(), PlanError> {
        for key in self.filters.keys() {
            if !self.satisfied.contains(key) {
                return Err(PlanError::UnsatisfiedFilter { key: key.clone() });
            }
        }
        Ok(())
    }
}
