//! The config-graph data model.
//!
//! `ContextNodeConfig` and `OperatorConfig` are modeled as a tagged variant, [`NodeConfig`],
//! rather than as an inheritance hierarchy, the way query-graph node kinds are tagged elsewhere in
//! this codebase rather than split across trait objects.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

/// The fixed id of the context sentinel.
pub const CONTEXT_NODE_ID: &str = "QueryContext";

/// A filter attached to a [`DataSourceSpec`] that must be asynchronously initialized before the
/// planner proceeds past factory setup.
pub trait SourceFilter: fmt::Debug + Send + Sync {
    fn initialize(&self) -> BoxFuture<'static, Result<(), PlanError>>;
}

/// Declarative description of a data source operator (the `DataSourceConfig`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSourceSpec {
    /// The factory key used to resolve this source's `QueryNodeFactory`.
    pub source_id: String,
    /// Upstream operators folded into this source by push-down. Empty until the push-down
    /// transformer rebuilds this source.
    #[serde(default)]
    pub push_down_nodes: Vec<OperatorSpec>,
    /// An optional filter that must be async-initialized before the planner can proceed.
    #[serde(skip)]
    pub filter: Option<Arc<dyn SourceFilter>>,
}

impl PartialEq for DataSourceSpec {
    fn eq(&self, other: &Self) -> bool {
        self.source_id == other.source_id && self.push_down_nodes == other.push_down_nodes
    }
}

/// Declarative description of one operator (the `OperatorConfig`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub id: String,
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
    /// Ordered ids of upstream sources this operator reads from.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub push_down: bool,
    #[serde(default)]
    pub joins: bool,
    /// `Some` iff this operator is a `DataSourceConfig`.
    #[serde(default)]
    pub data_source: Option<DataSourceSpec>,
}

impl OperatorSpec {
    pub fn is_data_source(&self) -> bool {
        self.data_source.is_some()
    }

    /// A stable 64-bit hash over this operator's semantic identity (`buildHashCode()`). Two
    /// configs with equal `build_hash_code` are treated as the same executor identity — this is
    /// an external contract callers must uphold when they hand-construct configs with the same
    /// id.
    pub fn build_hash_code(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.id.hash(&mut hasher);
        self.type_name.hash(&mut hasher);
        self.sources.hash(&mut hasher);
        self.push_down.hash(&mut hasher);
        self.joins.hash(&mut hasher);
        if let Some(ds) = &self.data_source {
            ds.source_id.hash(&mut hasher);
            for node in &ds.push_down_nodes {
                node.build_hash_code().hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    /// Rebuilds this data source with a new ordered `pushDownNodes` list
    /// (`s.toBuilder().setPushDownNodes(pushDowns).build()`). Fails if called on a non-source —
    /// callers only ever invoke this on nodes already known to be data sources.
    pub fn with_push_down_nodes(
        &self,
        push_down_nodes: Vec<OperatorSpec>,
    ) -> Result<OperatorSpec, PlanError> {
        crate::ensure!(
            self.data_source.is_some(),
            "with_push_down_nodes called on non-data-source operator {}",
            self.id
        );
        let mut rebuilt = self.clone();
        if let Some(ds) = rebuilt.data_source.as_mut() {
            ds.push_down_nodes = push_down_nodes;
        }
        Ok(rebuilt)
    }
}

/// A node of the config graph: either the synthetic context sentinel or a real operator.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    /// The singleton root of the config graph, corresponding to the externally-supplied
    /// `contextSink` executor.
    Context,
    Operator(Arc<OperatorSpec>),
}

impl NodeConfig {
    pub fn operator(spec: OperatorSpec) -> Self {
        NodeConfig::Operator(Arc::new(spec))
    }

    pub fn id(&self) -> &str {
        match self {
            NodeConfig::Context => CONTEXT_NODE_ID,
            NodeConfig::Operator(cfg) => &cfg.id,
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            NodeConfig::Context => None,
            NodeConfig::Operator(cfg) => cfg.type_name.as_deref(),
        }
    }

    pub fn sources(&self) -> &[String] {
        match self {
            NodeConfig::Context => &[],
            NodeConfig::Operator(cfg) => &cfg.sources,
        }
    }

    pub fn push_down(&self) -> bool {
        match self {
            NodeConfig::Context => false,
            NodeConfig::Operator(cfg) => cfg.push_down,
        }
    }

    pub fn joins(&self) -> bool {
        match self {
            NodeConfig::Context => false,
            NodeConfig::Operator(cfg) => cfg.joins,
        }
    }

    pub fn is_data_source(&self) -> bool {
        match self {
            NodeConfig::Context => false,
            NodeConfig::Operator(cfg) => cfg.is_data_source(),
        }
    }

    pub fn is_context(&self) -> bool {
        matches!(self, NodeConfig::Context)
    }

    pub fn as_operator(&self) -> Option<&Arc<OperatorSpec>> {
        match self {
            NodeConfig::Context => None,
            NodeConfig::Operator(cfg) => Some(cfg),
        }
    }

    /// Resolves the factory key for this node: `DataSourceConfig` uses `sourceId` lowercased,
    /// otherwise `type` lowercased, falling back to `id` lowercased. Returns `None` for the
    /// context sentinel, which has no factory.
    pub fn factory_key(&self) -> Option<String> {
        match self {
            NodeConfig::Context => None,
            NodeConfig::Operator(cfg) => Some(match &cfg.data_source {
                Some(ds) => ds.source_id.to_lowercase(),
                None => cfg
                    .type_name
                    .as_deref()
                    .unwrap_or(cfg.id.as_str())
                    .to_lowercase(),
            }),
        }
    }

    /// `buildHashCode()` for the tagged node. The context sentinel gets a fixed hash derived from
    /// its id, so plans are stable-hashable across runs rather than depending on allocation
    /// identity.
    pub fn build_hash_code(&self) -> u64 {
        match self {
            NodeConfig::Context => {
                let mut hasher = DefaultHasher::new();
                CONTEXT_NODE_ID.hash(&mut hasher);
                hasher.finish()
            }
            NodeConfig::Operator(cfg) => cfg.build_hash_code(),
        }
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}
