//! Runtime executor instances (`Executor`/`QueryNode`).

use std::fmt;

use futures::future::BoxFuture;
use tracing::Span;

use crate::config::NodeConfig;
use crate::error::PlanError;

/// A runtime instance produced by a factory from an [`OperatorConfig`](crate::config::OperatorSpec).
/// Planner code only ever holds these behind `Arc<dyn Executor>`, since factories (external
/// collaborators) are the only thing that constructs them.
pub trait Executor: fmt::Debug + Send + Sync {
    /// The config this executor was built from.
    fn config(&self) -> &NodeConfig;

    /// Asynchronously initializes this executor. Called exactly once per executor, after every
    /// executor it depends on (its config-graph successors) has completed its own `initialize`.
    fn initialize(&self, span: Span) -> BoxFuture<'static, Result<(), PlanError>>;

    /// Whether this executor is a data source, for `sources()`'s ordered bookkeeping. Defaults to
    /// `false`; source-producing factories override it.
    fn is_data_source(&self) -> bool {
        false
    }
}
