//! Core of the nodeflow engine.
//!
//! A workflow is a graph of nodes. Each node runs a prep/exec/post lifecycle
//! against a shared context and returns an action label; the flow follows
//! the edge registered for that label. Two families exist side by side:
//! ordinary nodes and flows ([`Node`], [`Graph`], [`Flow`]) and
//! suspension-capable ones ([`AsyncNode`], [`AsyncGraph`], [`AsyncFlow`]).

pub mod action;
pub mod async_flow;
pub mod async_node;
pub mod batch;
pub mod context;
pub mod error;
pub mod flow;
pub mod graph;
pub mod node;
pub mod parallel;
pub mod params;
pub mod retry;

pub use action::{ActionType, DefaultAction};
pub use async_flow::{
    AsyncBatchFlow, AsyncBatchFlowHooks, AsyncFlow, AsyncFlowHooks, AsyncParallelBatchFlow,
};
pub use async_node::{
    AsyncBatchNode, AsyncBatchStep, AsyncNode, AsyncNodeStep, AsyncStep, ParallelBatchStep,
};
pub use batch::{BatchFlow, BatchFlowHooks, BatchNode, BatchStep};
pub use context::SharedStore;
pub use error::{FlowError, FlowResult};
pub use flow::{Flow, FlowHooks};
pub use graph::{AsyncGraph, Graph, NodeId, Topology};
pub use node::{Node, NodeStep, Step};
pub use parallel::Concurrency;
pub use params::Params;
pub use retry::{
    with_retry, AsyncDelay, Delay, NoDelay, RetryNode, RetryPolicy, ThreadSleep, TokioSleep,
};

#[cfg(test)]
mod tests;
