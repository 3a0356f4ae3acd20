use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::action::{ActionType, DefaultAction};
use crate::async_node::AsyncStep;
use crate::batch::{BatchNode, BatchStep};
use crate::error::{FlowError, FlowResult};
use crate::node::{Node, NodeStep, Step};
use crate::params::Params;
use crate::retry::{Delay, ThreadSleep};

/// Identity of a node inside the graph that registered it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Nodes, their default parameters and their successor tables.
///
/// Generic over the step object so both families share the wiring logic;
/// use it through [`Graph`] or [`AsyncGraph`]. Steps are reference counted,
/// so one step may be registered under several ids or in several graphs, and
/// an id may be the successor of any number of nodes, itself included.
pub struct Topology<S: ?Sized, A> {
    steps: Vec<Arc<S>>,
    params: Vec<Params>,
    successors: Vec<HashMap<A, NodeId>>,
}

/// Graph of ordinary (non-suspending) steps
pub type Graph<C, A = DefaultAction> = Topology<dyn Step<C, A>, A>;

/// Graph of suspension-capable steps; ordinary nodes are accepted too
pub type AsyncGraph<C, A = DefaultAction> = Topology<dyn AsyncStep<C, A>, A>;

impl<S: ?Sized, A: ActionType> Topology<S, A> {
    pub fn new() -> Self {
        Topology {
            steps: Vec::new(),
            params: Vec::new(),
            successors: Vec::new(),
        }
    }

    /// Register an already shared step.
    pub fn add_shared(&mut self, step: Arc<S>) -> NodeId {
        let id = NodeId(self.steps.len());
        self.steps.push(step);
        self.params.push(Params::new());
        self.successors.push(HashMap::new());
        id
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.steps.len()
    }

    pub(crate) fn check(&self, id: NodeId) -> FlowResult<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(FlowError::UnknownNode(id))
        }
    }

    pub fn step(&self, id: NodeId) -> FlowResult<&Arc<S>> {
        self.steps.get(id.0).ok_or(FlowError::UnknownNode(id))
    }

    /// Default parameters of a node; flow parameters are merged over them.
    pub fn set_params(&mut self, id: NodeId, params: Params) -> FlowResult<()> {
        self.check(id)?;
        self.params[id.0] = params;
        Ok(())
    }

    pub fn params(&self, id: NodeId) -> FlowResult<&Params> {
        self.params.get(id.0).ok_or(FlowError::UnknownNode(id))
    }

    /// Route `action` from `from` to `to`.
    ///
    /// Re-registering an action overwrites the edge and returns the previous
    /// target; the overwrite is logged, not rejected.
    pub fn add_successor(
        &mut self,
        from: NodeId,
        to: NodeId,
        action: impl Into<A>,
    ) -> FlowResult<Option<NodeId>> {
        self.check(from)?;
        self.check(to)?;
        let action = action.into();
        let previous = self.successors[from.0].insert(action.clone(), to);
        if let Some(previous) = previous {
            warn!(
                from = %from,
                action = action.name(),
                previous = %previous,
                to = %to,
                "overwriting successor for action"
            );
        }
        Ok(previous)
    }

    /// Route the default action from `from` to `to`.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> FlowResult<Option<NodeId>> {
        self.add_successor(from, to, A::default())
    }

    pub fn successor(&self, from: NodeId, action: &A) -> Option<NodeId> {
        self.successors.get(from.0)?.get(action).copied()
    }

    pub fn successors(&self, from: NodeId) -> impl Iterator<Item = (&A, NodeId)> + '_ {
        self.successors
            .get(from.0)
            .into_iter()
            .flat_map(|table| table.iter().map(|(action, to)| (action, *to)))
    }

    pub fn has_successors(&self, id: NodeId) -> bool {
        self.successors.get(id.0).is_some_and(|table| !table.is_empty())
    }

    /// Resolve the node that follows `from` after it returned `action`.
    ///
    /// A miss ends the traversal. It is only worth a warning when the node had
    /// other edges, since that usually means a typo in the wiring.
    pub(crate) fn next(&self, from: NodeId, action: Option<A>) -> Option<NodeId> {
        let action = action.unwrap_or_default();
        let next = self.successor(from, &action);
        if next.is_none() && self.has_successors(from) {
            let known: Vec<&str> = self.successors(from).map(|(a, _)| a.name()).collect();
            warn!(
                node_id = %from,
                action = action.name(),
                ?known,
                "flow ends: action not found among successors"
            );
        }
        next
    }

    /// Parameters for one traversal step of `id`: the node's defaults with
    /// `flow_params` written over them.
    pub(crate) fn step_params(&self, id: NodeId, flow_params: &Params) -> FlowResult<Params> {
        Ok(self.params(id)?.merged(flow_params))
    }
}

impl<S: ?Sized, A: ActionType> Default for Topology<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized, A: Clone> Clone for Topology<S, A> {
    fn clone(&self) -> Self {
        Topology {
            steps: self.steps.clone(),
            params: self.params.clone(),
            successors: self.successors.clone(),
        }
    }
}

impl<S: ?Sized, A: fmt::Debug> fmt::Debug for Topology<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("nodes", &self.steps.len())
            .field("successors", &self.successors)
            .finish()
    }
}

impl<C, A> Graph<C, A>
where
    C: 'static,
    A: ActionType,
{
    pub fn add_node<N: Node<C, A> + 'static>(&mut self, node: N) -> NodeId {
        self.add_step(NodeStep::new(node))
    }

    pub fn add_batch_node<N: BatchNode<C, A> + 'static>(&mut self, node: N) -> NodeId {
        self.add_step(BatchStep::new(node))
    }

    /// Register any step, including nested flows.
    pub fn add_step<T: Step<C, A> + 'static>(&mut self, step: T) -> NodeId {
        self.add_shared(Arc::new(step))
    }

    /// Run one node's lifecycle in isolation, without following successors.
    pub fn run_node(&self, id: NodeId, ctx: &C) -> FlowResult<Option<A>> {
        self.run_node_with(id, ctx, &Params::new(), &ThreadSleep)
    }

    pub fn run_node_with(
        &self,
        id: NodeId,
        ctx: &C,
        params: &Params,
        delay: &dyn Delay,
    ) -> FlowResult<Option<A>> {
        let step = self.step(id)?;
        if self.has_successors(id) {
            warn!(node = step.name(), node_id = %id, "node won't run successors, use a Flow");
        }
        step.run_step(ctx, &self.step_params(id, params)?, delay)
    }
}
