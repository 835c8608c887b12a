//! The planner's error taxonomy.
//!
//! One `thiserror` variant per documented failure kind, plus an `Internal` catch-all for
//! invariants that should never be violated by a conforming caller, reached through the
//! `internal_error!`/`bail!`/`ensure!` macro trio rather than constructed by hand at call sites.

use thiserror::Error;

/// Create an internal error, wrapping it as a [`PlanError::Internal`].
#[macro_export]
macro_rules! internal_error {
    ( $( $arg:tt )+ ) => {
        $crate::error::PlanError::internal(format!( $( $arg )+ ))
    }
}

/// Break out of the current function, returning an internal error.
#[macro_export]
macro_rules! bail {
    ( $( $arg:tt )+ ) => {
        return Err($crate::internal_error!( $( $arg )+ ))
    }
}

/// Treat this as an assertion for conditions that *should never happen* in normal operation: it
/// panics in debug builds and returns an internal error in release builds.
#[macro_export]
macro_rules! ensure {
    ( $expr:expr, $( $arg:tt )+ ) => {
        if !$expr {
            debug_assert!(false, $( $arg )+);
            $crate::bail!( $( $arg )+ );
        }
    }
}

/// All errors the planner can raise. Every one is fatal to the current `plan()` call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// An internal error has occurred — an invariant the planner itself is responsible for was
    /// violated. Not part of the user-facing taxonomy; reserved for bugs.
    #[error("internal query planner error: {message}")]
    Internal { message: String },

    /// Two operator configs in the submitted execution graph share an id.
    #[error("duplicate operator id in execution graph: {id}")]
    DuplicateId { id: String },

    /// A sink filter string was not of the form `"nodeId"` or `"nodeId:sourceHint"`.
    #[error("invalid sink filter {filter:?}: must be \"nodeId\" or \"nodeId:sourceHint\"")]
    InvalidFilter { filter: String },

    /// The factory registry returned nothing for a required factory key.
    #[error("no query node factory registered for key {key:?}")]
    NoFactory { key: String },

    /// A factory's `new_node` returned `None` instead of an executor.
    #[error("factory for {key:?} returned no executor for node {node_id:?}")]
    NullExecutor { key: String, node_id: String },

    /// Adding an edge would have created a cycle; the edge was not added.
    #[error("adding edge {from:?} -> {to:?} would create a cycle")]
    CycleError { from: String, to: String },

    /// A sink filter id never matched any node in the final config graph.
    #[error("sink filter {key:?} was never satisfied")]
    UnsatisfiedFilter { key: String },
}

impl PlanError {
    pub fn internal(message: impl Into<String>) -> Self {
        PlanError::Internal {
            message: message.into(),
        }
    }
}
