//! The push-down transformer: folds eligible upstream operators into their data source,
//! rewriting the source's `pushDownNodes` via [`ConfigGraph::replace`].
//!
//! Walks dependency edges while mutating the live `StableDiGraph` in the same pass, collecting
//! the neighbor list for each node up front rather than holding one global frozen clone.

use petgraph::stable_graph::NodeIndex;
use tracing::trace;

use crate::config::{NodeConfig, OperatorSpec};
use crate::error::PlanError;
use crate::factory::QueryPipelineContext;
use crate::graph::ConfigGraph;

/// Runs push-down for every data source currently in `graph`.
#[tracing::instrument(skip(graph, context))]
pub fn push_down(
    graph: &mut ConfigGraph,
    context: &dyn QueryPipelineContext,
) -> Result<(), PlanError> {
    let sources: Vec<NodeIndex> = graph.source_nodes().collect();
    for source in sources {
        push_down_source(graph, context, source)?;
    }
    Ok(())
}

fn push_down_source(
    graph: &mut ConfigGraph,
    context: &dyn QueryPipelineContext,
    source: NodeIndex,
) -> Result<(), PlanError> {
    let preds: Vec<NodeIndex> = graph.predecessors(source).collect();
    let mut push_downs: Vec<OperatorSpec> = Vec::new();

    for pred in preds {
        if attempt_push_down(graph, context, pred, source, &mut push_downs)? {
            sever_and_prune(graph, pred, source);
        }
    }

    if push_downs.is_empty() {
        return Ok(());
    }

    let Some(NodeConfig::Operator(source_spec)) = graph.node(source).cloned() else {
        return Ok(());
    };
    trace!(
        source = %source_spec.id,
        folded = push_downs.len(),
        "folding operators into data source"
    );
    let rebuilt = source_spec.with_push_down_nodes(push_downs)?;
    graph.replace(source, NodeConfig::operator(rebuilt))?;
    Ok(())
}

/// Recursively attempts to fold `node` into `source`, the data source at the root of this walk —
/// fixed across the whole recursion, not the immediate caller — returning whether it was pushed.
/// Keeping `source` fixed is what lets a node two or more levels up the chain re-wire directly to
/// the source once everything between them folds away, rather than being left dangling on an
/// edge to an operator that no longer exists.
///
/// Records `node` into `push_downs` as soon as it is found eligible, before descending into its
/// own predecessors, so a node nearer the source is always recorded before one farther away —
/// matching `pushDownNodes`' "nearest to source first" order, which lets the source apply them
/// back in dataflow order.
fn attempt_push_down(
    graph: &mut ConfigGraph,
    context: &dyn QueryPipelineContext,
    node: NodeIndex,
    source: NodeIndex,
    push_downs: &mut Vec<OperatorSpec>,
) -> Result<bool, PlanError> {
    if !is_eligible(graph, context, node) {
        graph.add_edge(node, source)?;
        return Ok(false);
    }

    if let Some(spec) = operator_spec(graph, node) {
        push_downs.push(spec);
    }

    let preds: Vec<NodeIndex> = graph.predecessors(node).collect();
    for pred in preds {
        if attempt_push_down(graph, context, pred, source, push_downs)? {
            sever_and_prune(graph, pred, node);
        }
    }
    Ok(true)
}

/// Severs `pred`'s edge into `node`. `pred` has already been recorded as folded by the time this
/// runs, so once its last live successor edge is gone it no longer represents a standalone
/// executor and is dropped from the graph outright — including whatever edge `pred` itself picked
/// up from an ineligible ancestor further up the chain.
fn sever_and_prune(graph: &mut ConfigGraph, pred: NodeIndex, node: NodeIndex) {
    graph.remove_edge(pred, node);
    if graph.node(pred).is_some() && graph.successors(pred).next().is_none() {
        graph.remove_node(pred);
    }
}

/// `factory.supportsPushdown(type-of node) && node.pushDown()`. The context sentinel and nodes
/// whose factory can't be resolved are never eligible.
fn is_eligible(graph: &ConfigGraph, context: &dyn QueryPipelineContext, node: NodeIndex) -> bool {
    let Some(NodeConfig::Operator(spec)) = graph.node(node) else {
        return false;
    };
    if !spec.push_down {
        return false;
    }
    let Some(key) = graph.node(node).and_then(NodeConfig::factory_key) else {
        return false;
    };
    context
        .factory(&key)
        .is_some_and(|factory| factory.supports_pushdown(spec.type_name.as_deref()))
}

fn operator_spec(graph: &ConfigGraph, idx: NodeIndex) -> Option<OperatorSpec> {
    match graph.node(idx) {
        Some(NodeConfig::Operator(spec)) => Some((**spec).clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::DataSourceSpec;
    use crate::executor::Executor;
    use crate::factory::QueryNodeFactory;

    #[derive(Debug)]
    struct StubFactory {
        pushdown: bool,
    }

    impl QueryNodeFactory for StubFactory {
        fn setup_graph(
            &self,
            _context: &dyn QueryPipelineContext,
            _node_id: &str,
            _graph: &mut ConfigGraph,
        ) -> Result<(), PlanError> {
            Ok(())
        }

        fn supports_pushdown(&self, _type_name: Option<&str>) -> bool {
            self.pushdown
        }

        fn new_node(
            &self,
            _context: &dyn QueryPipelineContext,
            _node: &OperatorSpec,
        ) -> Option<Arc<dyn Executor>> {
            None
        }
    }

    struct StubContext {
        factories: Vec<(&'static str, Arc<dyn QueryNodeFactory>)>,
    }

    impl QueryPipelineContext for StubContext {
        fn execution_graph(&self) -> &[OperatorSpec] {
            &[]
        }

        fn sink_filters(&self) -> &[String] {
            &[]
        }

        fn factory(&self, key: &str) -> Option<Arc<dyn QueryNodeFactory>> {
            self.factories
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, f)| f.clone())
        }
    }

    fn op(id: &str, type_name: &str, push_down: bool) -> OperatorSpec {
        OperatorSpec {
            id: id.to_owned(),
            type_name: Some(type_name.to_owned()),
            push_down,
            ..Default::default()
        }
    }

    fn source(id: &str) -> OperatorSpec {
        OperatorSpec {
            id: id.to_owned(),
            data_source: Some(DataSourceSpec {
                source_id: id.to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn linear_push_down_folds_both_operators() {
        let mut g = ConfigGraph::new();
        let ctx_idx = g.add_node(NodeConfig::Context).unwrap();
        let filter = g
            .add_node(NodeConfig::operator(op("filter", "filter", true)))
            .unwrap();
        let group = g
            .add_node(NodeConfig::operator(op("group", "group", true)))
            .unwrap();
        let src = g.add_node(NodeConfig::operator(source("influx"))).unwrap();
        g.add_edge(ctx_idx, filter).unwrap();
        g.add_edge(filter, group).unwrap();
        g.add_edge(group, src).unwrap();

        let context = StubContext {
            factories: vec![
                ("filter", Arc::new(StubFactory { pushdown: true })),
                ("group", Arc::new(StubFactory { pushdown: true })),
            ],
        };
        push_down(&mut g, &context).unwrap();

        // `replace` mints a fresh index for the rebuilt source; look it up by id instead of
        // reusing the pre-push-down `src` index.
        let src = g.find_id("influx").unwrap();
        assert_eq!(g.predecessors(src).collect::<Vec<_>>(), vec![ctx_idx]);
        let rebuilt = g.node(src).unwrap().as_operator().unwrap();
        let ids: Vec<&str> = rebuilt
            .data_source
            .as_ref()
            .unwrap()
            .push_down_nodes
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        // nearest to source first, so the source can re-apply them in dataflow order.
        assert_eq!(ids, vec!["group", "filter"]);

        // folded operators no longer exist as standalone config nodes.
        assert!(g.find_id("filter").is_none());
        assert!(g.find_id("group").is_none());
    }

    #[test]
    fn ineligible_predecessor_blocks_fold() {
        let mut g = ConfigGraph::new();
        let ctx_idx = g.add_node(NodeConfig::Context).unwrap();
        let filter = g
            .add_node(NodeConfig::operator(op("filter", "filter", true)))
            .unwrap();
        let group = g
            .add_node(NodeConfig::operator(op("group", "group", false)))
            .unwrap();
        let src = g.add_node(NodeConfig::operator(source("influx"))).unwrap();
        g.add_edge(ctx_idx, filter).unwrap();
        g.add_edge(filter, group).unwrap();
        g.add_edge(group, src).unwrap();

        let context = StubContext {
            factories: vec![
                ("filter", Arc::new(StubFactory { pushdown: true })),
                ("group", Arc::new(StubFactory { pushdown: true })),
            ],
        };
        push_down(&mut g, &context).unwrap();

        // group isn't eligible (pushDown = false), so nothing folds into the source.
        assert_eq!(g.predecessors(src).collect::<Vec<_>>(), vec![group]);
        let rebuilt = g.node(src).unwrap().as_operator().unwrap();
        assert!(rebuilt.data_source.as_ref().unwrap().push_down_nodes.is_empty());
    }
}
