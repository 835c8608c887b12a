//! The factory setup driver: an iterative, full-restart-on-mutation convergence loop that lets
//! factories rewrite the config graph until it stabilizes.

use indexmap::IndexSet;
use petgraph::stable_graph::NodeIndex;
use tracing::debug;

use crate::error::PlanError;
use crate::factory::QueryPipelineContext;
use crate::graph::ConfigGraph;
use crate::sink_filter::SinkFilterResolver;

/// Optional cap on convergence restarts (`PlannerConfig::restart_limit`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupLimits {
    pub restart_limit: Option<usize>,
}

/// Runs the factory setup pass to convergence. On success, every reachable node has been offered
/// to its factory and the graph no longer changes from another pass.
#[tracing::instrument(skip(graph, resolver, context, limits))]
pub fn run_factory_setup(
    graph: &mut ConfigGraph,
    context_idx: NodeIndex,
    resolver: &mut SinkFilterResolver,
    context: &dyn QueryPipelineContext,
    limits: SetupLimits,
) -> Result<(), PlanError> {
    let mut restarts = 0usize;
    loop {
        let sources: Vec<NodeIndex> = graph.source_nodes().collect();
        let mut visited = IndexSet::new();
        let mut mutated = false;

        for source in sources {
            if visit_upward(graph, context_idx, resolver, context, source, &mut visited)? {
                mutated = true;
                break;
            }
        }

        if !mutated {
            return Ok(());
        }
        restarts += 1;
        debug!(restarts, "factory setup pass mutated the graph; restarting");
        if let Some(limit) = limits.restart_limit {
            if restarts > limit {
                return Err(PlanError::internal(format!(
                    "factory setup did not converge within {limit} restarts"
                )));
            }
        }
    }
}


/// Recursively visits `node` and its upward neighbors (predecessors), returning whether this
/// visit mutated the graph, in which case the whole pass must abort and restart.
fn visit_upward(
    graph: &mut ConfigGraph,
    context_idx: NodeIndex,
    resolver: &mut SinkFilterResolver,
    context: &dyn QueryPipelineContext,
    node: NodeIndex,
    visited: &mut IndexSet<NodeIndex>,
) -> Result<bool, PlanError> {
    if visited.contains(&node) {
        return Ok(false);
    }

    let is_context = graph
        .node(node)
        .map(|n| n.is_context())
        .unwrap_or(true);

    if !is_context {
        let snapshot = graph.snapshot();
        resolver.visit(graph, context_idx, node)?;

        let node_id = graph.node(node).map(|n| n.id().to_owned()).unwrap_or_default();
        let key = graph
            .node(node)
            .and_then(|n| n.factory_key())
            .unwrap_or_default();
        let factory = context
            .factory(&key)
            .ok_or_else(|| PlanError::NoFactory { key: key.clone() })?;
        factory.setup_graph(context, &node_id, graph)?;

        if graph.changed_since(&snapshot) {
            return Ok(true);
        }
    }

    visited.insert(node);

    let preds: Vec<NodeIndex> = graph.predecessors(node).collect();
    for pred in preds {
        if visit_upward(graph, context_idx, resolver, context, pred, visited)? {
            return Ok(true);
        }
    }
    Ok(false)
}
