//! The executor builder and serialization-source computation.
//!
//! Walks the config graph's dependency tree bottom-up while maintaining a dedup map keyed by a
//! content hash, `build_hash_code`, so a subtree already built under one hash is reused rather
//! than reconstructed.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use petgraph::stable_graph::NodeIndex;
use tracing::instrument;

use crate::config::CONTEXT_NODE_ID;
use crate::error::PlanError;
use crate::executor::Executor;
use crate::factory::QueryPipelineContext;
use crate::graph::{ConfigGraph, ExecutorGraph};

/// The materialized result of [`build_executor_graph`]: the executor graph itself plus the
/// bookkeeping the top-level planner exposes (`nodeForId`, `sources()`).
pub struct BuildResult {
    pub executor_graph: ExecutorGraph,
    pub context_idx: NodeIndex,
    pub nodes_by_id: IndexMap<String, NodeIndex>,
    /// Data-source executors in order of construction.
    pub data_sources: Vec<Arc<dyn Executor>>,
}

/// Builds the executor graph bottom-up, walking only the config graph's reachable-from-context
/// subtree. `context_sink` is the caller's pre-created executor for the context sentinel.
///
/// Seeding from `config.roots()` instead would also pick up branches a sink filter left wired to
/// nothing (predecessor-less but not the context node), materializing executors for them that are
/// never reachable from `contextSink` and never get initialized.
#[instrument(skip(config, context, context_sink))]
pub fn build_executor_graph(
    config: &ConfigGraph,
    context: &dyn QueryPipelineContext,
    context_sink: Arc<dyn Executor>,
) -> Result<BuildResult, PlanError> {
    let context_config_idx = config
        .find_id(CONTEXT_NODE_ID)
        .ok_or_else(|| PlanError::internal("config graph missing context sentinel"))?;

    let mut executor_graph = ExecutorGraph::new();
    let context_idx = executor_graph.add_node(context_sink);

    let mut builder = Builder {
        config,
        context,
        executor_graph,
        constructed: HashMap::new(),
        nodes_by_id: IndexMap::new(),
        data_sources: Vec::new(),
        context_idx,
    };

    builder.build_node(context_config_idx)?;

    Ok(BuildResult {
        executor_graph: builder.executor_graph,
        context_idx: builder.context_idx,
        nodes_by_id: builder.nodes_by_id,
        data_sources: builder.data_sources,
    })
}

struct Builder<'a> {
    config: &'a ConfigGraph,
    context: &'a dyn QueryPipelineContext,
    executor_graph: ExecutorGraph,
    /// Content-addressed dedup: a config subtree already built under one hash is reused rather
    /// than reconstructed.
    constructed: HashMap<u64, NodeIndex>,
    nodes_by_id: IndexMap<String, NodeIndex>,
    data_sources: Vec<Arc<dyn Executor>>,
    context_idx: NodeIndex,
}

impl Builder<'_> {
    fn build_node(&mut self, node: NodeIndex) -> Result<NodeIndex, PlanError> {
        let cfg = self
            .config
            .node(node)
            .ok_or_else(|| PlanError::internal("config node vanished during executor build"))?
            .clone();

        let hash = cfg.build_hash_code();
        if let Some(&idx) = self.constructed.get(&hash) {
            return Ok(idx);
        }

        let successors: Vec<NodeIndex> = self.config.successors(node).collect();
        let mut built_successors = Vec::with_capacity(successors.len());
        for succ in successors {
            built_successors.push(self.build_node(succ)?);
        }

        if cfg.is_context() {
            for &src in &built_successors {
                self.executor_graph.add_edge(self.context_idx, src)?;
            }
            self.constructed.insert(hash, self.context_idx);
            self.nodes_by_id
                .insert(cfg.id().to_owned(), self.context_idx);
            return Ok(self.context_idx);
        }

        let key = cfg
            .factory_key()
            .ok_or_else(|| PlanError::internal("non-context node has no factory key"))?;
        let factory = self
            .context
            .factory(&key)
            .ok_or_else(|| PlanError::NoFactory { key: key.clone() })?;
        let operator = cfg
            .as_operator()
            .ok_or_else(|| PlanError::internal("non-context node is not an operator"))?;
        let executor = factory.new_node(self.context, operator).ok_or_else(|| {
            PlanError::NullExecutor {
                key: key.clone(),
                node_id: cfg.id().to_owned(),
            }
        })?;

        let is_source = executor.is_data_source();
        let idx = self.executor_graph.add_node(executor.clone());
        self.nodes_by_id.insert(cfg.id().to_owned(), idx);
        self.constructed.insert(hash, idx);
        if is_source {
            self.data_sources.push(executor);
        }

        for &src in &built_successors {
            self.executor_graph.add_edge(idx, src)?;
        }
        Ok(idx)
    }
}

/// Computes the sink's expected result-id set from the context node, applying the context node's
/// special prefixing rule to its direct successors.
pub fn serialization_sources(graph: &ConfigGraph, context_idx: NodeIndex) -> IndexSet<String> {
    let mut result = IndexSet::new();
    for d in graph.successors(context_idx) {
        let Some(cfg) = graph.node(d) else {
            continue;
        };
        if cfg.is_data_source() || cfg.joins() {
            result.insert(cfg.id().to_owned());
        } else {
            let id = cfg.id().to_owned();
            for x in collect_sources(graph, d) {
                result.insert(format!("{id}:{x}"));
            }
        }
    }
    result
}

/// The non-special-cased recursion used at every level below the context node's direct
/// successors: a data source or joiner contributes its own id; anything else forwards the union
/// of its successors' contributions unprefixed.
fn collect_sources(graph: &ConfigGraph, idx: NodeIndex) -> IndexSet<String> {
    let Some(cfg) = graph.node(idx) else {
        return IndexSet::new();
    };
    if cfg.is_data_source() || cfg.joins() {
        let mut set = IndexSet::new();
        set.insert(cfg.id().to_owned());
        return set;
    }
    let mut result = IndexSet::new();
    for succ in graph.successors(idx) {
        result.extend(collect_sources(graph, succ));
    }
    result
}
