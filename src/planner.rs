//! The top-level `plan(span)` orchestration and its outward-facing artifacts.
//!
//! `Planner::plan` strings together setup, push-down, build, and initialize behind one public
//! entry point, the way a planner's top-level build method strings together validation,
//! dependency-graph construction, and optimization passes.

use std::sync::Arc;

use futures::future::try_join_all;
use indexmap::{IndexMap, IndexSet};
use petgraph::stable_graph::NodeIndex;
use tracing::{instrument, Span};

use crate::config::NodeConfig;
use crate::error::PlanError;
use crate::executor::Executor;
use crate::factory::QueryPipelineContext;
use crate::graph::{ConfigGraph, ExecutorGraph};
use crate::sink_filter::SinkFilterResolver;
use crate::{build, init, pushdown, setup};

/// The planner's tunable surface. Deliberately small: cost-based optimization and cross-query
/// caching are out of scope, so there is nothing else to make tunable.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Caps factory-setup convergence restarts. `None` means unbounded, matching the literal
    /// convergence-loop behavior; set this only in embedding contexts that can't tolerate a
    /// runaway, non-idempotent factory.
    pub restart_limit: Option<usize>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            restart_limit: None,
        }
    }
}

/// The query planner: a single stateful object with a construct → `plan` → expose lifecycle.
/// `plan` may be called at most once.
pub struct Planner {
    context: Arc<dyn QueryPipelineContext>,
    context_sink: Arc<dyn Executor>,
    config: PlannerConfig,
    result: Option<PlanOutcome>,
}

struct PlanOutcome {
    config_graph: ConfigGraph,
    executor_graph: ExecutorGraph,
    nodes_by_id: IndexMap<String, NodeIndex>,
    data_sources: Vec<Arc<dyn Executor>>,
    serialization_sources: IndexSet<String>,
}

impl Planner {
    pub fn new(
        context: Arc<dyn QueryPipelineContext>,
        context_sink: Arc<dyn Executor>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            context,
            context_sink,
            config,
            result: None,
        }
    }

    /// Runs the full planning pipeline. Fails with whichever [`PlanError`] the first failing phase
    /// raises; any partially-mutated config graph from a cycle error is discarded along with the
    /// planner, which is left in an unrecoverable state for this call.
    #[instrument(skip(self, span))]
    pub async fn plan(&mut self, span: Span) -> Result<(), PlanError> {
        let (mut config_graph, context_idx) = build_initial_graph(self.context.as_ref())?;

        let mut resolver = SinkFilterResolver::parse(self.context.sink_filters())?;

        setup::run_factory_setup(
            &mut config_graph,
            context_idx,
            &mut resolver,
            self.context.as_ref(),
            setup::SetupLimits {
                restart_limit: self.config.restart_limit,
            },
        )?;
        config_graph.rebuild_source_nodes();

        initialize_source_filters(&config_graph).await?;

        resolver.check_satisfied()?;
        pushdown::push_down(&mut config_graph, self.context.as_ref())?;

        let serialization_sources = build::serialization_sources(&config_graph, context_idx);

        let build_result = build::build_executor_graph(
            &config_graph,
            self.context.as_ref(),
            self.context_sink.clone(),
        )?;

        init::initialize(&build_result.executor_graph, build_result.context_idx, span).await?;

        self.result = Some(PlanOutcome {
            config_graph,
            executor_graph: build_result.executor_graph,
            nodes_by_id: build_result.nodes_by_id,
            data_sources: build_result.data_sources,
            serialization_sources,
        });
        Ok(())
    }

    fn outcome(&self) -> &PlanOutcome {
        self.result
            .as_ref()
            .expect("planner artifacts accessed before plan() completed")
    }

    pub fn graph(&self) -> &ExecutorGraph {
        &self.outcome().executor_graph
    }

    pub fn config_graph(&self) -> &ConfigGraph {
        &self.outcome().config_graph
    }

    pub fn sources(&self) -> &[Arc<dyn Executor>] {
        &self.outcome().data_sources
    }

    pub fn serialization_sources(&self) -> &IndexSet<String> {
        &self.outcome().serialization_sources
    }

    pub fn node_for_id(&self, id: &str) -> Option<&Arc<dyn Executor>> {
        let idx = *self.outcome().nodes_by_id.get(id)?;
        self.outcome().executor_graph.node(idx)
    }
}

/// Builds the initial config graph from the query's execution graph: a context sentinel plus one
/// node per operator, wired to each operator's declared sources.
fn build_initial_graph(
    context: &dyn QueryPipelineContext,
) -> Result<(ConfigGraph, NodeIndex), PlanError> {
    let mut graph = ConfigGraph::new();
    let context_idx = graph.add_node(NodeConfig::Context)?;

    for spec in context.execution_graph() {
        graph.add_node(NodeConfig::operator(spec.clone()))?;
    }

    for spec in context.execution_graph() {
        let node_idx = graph
            .find_id(&spec.id)
            .ok_or_else(|| PlanError::internal(format!("just-inserted node {} missing", spec.id)))?;
        for source_id in &spec.sources {
            let source_idx = graph.find_id(source_id).ok_or_else(|| {
                PlanError::internal(format!(
                    "operator {} references unknown source {source_id}",
                    spec.id
                ))
            })?;
            graph.add_edge(node_idx, source_idx)?;
        }
    }

    Ok((graph, context_idx))
}

/// Kicks off every data source's filter initialization and waits for all of them.
async fn initialize_source_filters(graph: &ConfigGraph) -> Result<(), PlanError> {
    let mut futures = Vec::new();
    for idx in graph.source_nodes() {
        let Some(NodeConfig::Operator(spec)) = graph.node(idx) else {
            continue;
        };
        if let Some(filter) = spec.data_source.as_ref().and_then(|ds| ds.filter.clone()) {
            futures.push(filter.initialize());
        }
    }
    try_join_all(futures).await?;
    Ok(())
}
