//! The depth-first async executor initializer.
//!
//! Fans work out across each node's successors and joins on completion; the fan-in is per-node
//! rather than a flat `join_all` over independent subtrees, since each executor may be shared by
//! multiple parents and must only initialize once (`futures::future::Shared` plus a memo map).

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use petgraph::stable_graph::NodeIndex;
use tracing::{instrument, Span};

use crate::error::PlanError;
use crate::executor::Executor;
use crate::graph::ExecutorGraph;

type InitFuture = Shared<BoxFuture<'static, Result<(), PlanError>>>;

struct Node {
    executor: Arc<dyn Executor>,
    successors: Vec<NodeIndex>,
}

/// Recursively initializes the executor graph depth-first from `context_idx`: for any edge
/// `a -> b`, `b.initialize` completes before `a.initialize` starts. Each executor initializes at
/// most once, memoized via a `Shared` future so multiple parents fan in on the same completion.
#[instrument(skip(graph, span))]
pub async fn initialize(
    graph: &ExecutorGraph,
    context_idx: NodeIndex,
    span: Span,
) -> Result<(), PlanError> {
    let nodes = snapshot_nodes(graph, context_idx);
    let mut memo: HashMap<NodeIndex, InitFuture> = HashMap::new();
    run(context_idx, context_idx, &nodes, &span, &mut memo).await
}

/// Pulls the reachable subgraph into an owned, `'static`-friendly shape so the recursive async
/// walk doesn't need to hold a borrow of `graph` across `.await` points.
fn snapshot_nodes(graph: &ExecutorGraph, context_idx: NodeIndex) -> HashMap<NodeIndex, Node> {
    let mut nodes = HashMap::new();
    let mut stack = vec![context_idx];
    while let Some(idx) = stack.pop() {
        if nodes.contains_key(&idx) {
            continue;
        }
        let Some(executor) = graph.node(idx) else {
            continue;
        };
        let successors: Vec<NodeIndex> = graph.successors(idx).collect();
        for &succ in &successors {
            stack.push(succ);
        }
        nodes.insert(
            idx,
            Node {
                executor: executor.clone(),
                successors,
            },
        );
    }
    nodes
}

fn run<'a>(
    context_idx: NodeIndex,
    node: NodeIndex,
    nodes: &'a HashMap<NodeIndex, Node>,
    span: &'a Span,
    memo: &'a mut HashMap<NodeIndex, InitFuture>,
) -> BoxFuture<'a, Result<(), PlanError>> {
    async move {
        if let Some(fut) = memo.get(&node) {
            return fut.clone().await;
        }

        let Some(entry) = nodes.get(&node) else {
            return Err(PlanError::internal("executor vanished during initialize"));
        };

        for &succ in &entry.successors {
            run(context_idx, succ, nodes, span, &mut *memo).await?;
        }

        let fut: InitFuture = if node == context_idx {
            futures::future::ready(Ok(())).boxed().shared()
        } else {
            entry.executor.initialize(span.clone()).shared()
        };
        memo.insert(node, fut.clone());
        fut.await
    }
    .boxed()
}
