//! External collaborator interfaces: the operator factory registry, factory behavior, and the
//! surrounding query pipeline context. These are deliberately thin traits — their
//! *implementations* (registry lookup, concrete factory behavior, the real pipeline context) are
//! out of scope here, so the planner pipeline in `setup`, `pushdown`, and `build` can be
//! implemented and tested against an in-memory double without a real registry.

use std::sync::Arc;

use crate::config::OperatorSpec;
use crate::error::PlanError;
use crate::executor::Executor;
use crate::graph::ConfigGraph;

/// An operator factory: knows how to rewrite the graph for its operator kind (`setup_graph`),
/// whether that kind can be folded into a data source (`supports_pushdown`), and how to build
/// executors (`new_node`).
pub trait QueryNodeFactory: Send + Sync {
    /// Performs arbitrary mutations on the config graph for `node_id` via `graph`'s public mutator
    /// surface. Invoked once per unvisited node during the factory setup pass.
    fn setup_graph(
        &self,
        context: &dyn QueryPipelineContext,
        node_id: &str,
        graph: &mut ConfigGraph,
    ) -> Result<(), PlanError>;

    /// Whether an operator of this `type_name` can be folded into a data source by push-down.
    fn supports_pushdown(&self, type_name: Option<&str>) -> bool;

    /// Builds a runtime executor for `node`, or `None` if construction failed (surfaced by the
    /// caller as [`PlanError::NullExecutor`]).
    fn new_node(
        &self,
        context: &dyn QueryPipelineContext,
        node: &OperatorSpec,
    ) -> Option<Arc<dyn Executor>>;
}

/// The surrounding query pipeline context: the submitted execution graph, sink filter directives,
/// and factory registry lookup.
pub trait QueryPipelineContext: Send + Sync {
    /// The user-submitted logical execution graph: one [`OperatorSpec`] per operator.
    fn execution_graph(&self) -> &[OperatorSpec];

    /// Sink-filter directive strings, in the pipeline's wire format.
    fn sink_filters(&self) -> &[String];

    /// `tsdb().getRegistry().getQueryNodeFactory(key)`: resolves a factory by its lowercased key,
    /// or `None` if the registry has nothing registered for it.
    fn factory(&self, key: &str) -> Option<Arc<dyn QueryNodeFactory>>;
}
