use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info_span};
use uuid::Uuid;

use crate::action::{ActionType, DefaultAction};
use crate::async_node::AsyncStep;
use crate::error::{FlowError, FlowResult};
use crate::flow::Flow;
use crate::graph::{Graph, NodeId};
use crate::node::Step;
use crate::params::Params;
use crate::retry::{self, AsyncDelay, Delay, RetryPolicy};

/// A node whose exec phase runs once per item.
///
/// `prep` yields the items in order, each item goes through the retry loop
/// with a fresh attempt counter, and `post` receives the items together with
/// the outputs in the same order. An empty batch still reaches `post`.
pub trait BatchNode<C, A = DefaultAction>: Send + Sync
where
    A: ActionType,
{
    type Item: Send + Sync;
    type Output: Send;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Applied to each item separately
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn prep(&self, _ctx: &C, _params: &Params) -> FlowResult<Vec<Self::Item>> {
        Ok(Vec::new())
    }

    fn exec(&self, item: &Self::Item) -> FlowResult<Self::Output>;

    fn exec_fallback(&self, _item: &Self::Item, error: FlowError) -> FlowResult<Self::Output> {
        Err(error)
    }

    fn post(
        &self,
        _ctx: &C,
        _params: &Params,
        _items: Vec<Self::Item>,
        _outputs: Vec<Self::Output>,
    ) -> FlowResult<Option<A>> {
        Ok(None)
    }
}

/// Adapter running a [`BatchNode`] as a graph step.
#[derive(Clone, Debug)]
pub struct BatchStep<N> {
    node: N,
}

impl<N> BatchStep<N> {
    pub fn new(node: N) -> Self {
        BatchStep { node }
    }

    pub fn inner(&self) -> &N {
        &self.node
    }
}

impl<C, A, N> Step<C, A> for BatchStep<N>
where
    A: ActionType,
    N: BatchNode<C, A>,
{
    fn name(&self) -> &str {
        self.node.name()
    }

    fn run_step(&self, ctx: &C, params: &Params, delay: &dyn Delay) -> FlowResult<Option<A>> {
        let node = &self.node;
        let policy = node.retry_policy();
        let items = node.prep(ctx, params)?;
        debug!(node = node.name(), items = items.len(), "running batch");
        let mut outputs = Vec::with_capacity(items.len());
        for item in &items {
            outputs.push(retry::execute(
                node.name(),
                &policy,
                delay,
                || node.exec(item),
                |e| node.exec_fallback(item, e),
            )?);
        }
        node.post(ctx, params, items, outputs)
    }
}

#[async_trait]
impl<C, A, N> AsyncStep<C, A> for BatchStep<N>
where
    C: Send + Sync + 'static,
    A: ActionType,
    N: BatchNode<C, A>,
{
    fn name(&self) -> &str {
        self.node.name()
    }

    async fn run_step(
        &self,
        ctx: &C,
        params: &Params,
        delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        let node = &self.node;
        let policy = node.retry_policy();
        let items = node.prep(ctx, params)?;
        let mut outputs = Vec::with_capacity(items.len());
        for item in &items {
            let output = retry::execute_async(
                node.name(),
                &policy,
                delay,
                move || std::future::ready(node.exec(item)),
                move |e| std::future::ready(node.exec_fallback(item, e)),
            )
            .await?;
            outputs.push(output);
        }
        node.post(ctx, params, items, outputs)
    }
}

/// Hooks of a [`BatchFlow`]: `prep` produces one parameter set per run.
pub trait BatchFlowHooks<C, A = DefaultAction>: Send + Sync
where
    A: ActionType,
{
    fn prep(&self, ctx: &C, params: &Params) -> FlowResult<Vec<Params>>;

    /// Receives the parameter sets `prep` produced. Results of the runs are
    /// expected in the context.
    fn post(&self, _ctx: &C, _params: &Params, _sets: Vec<Params>) -> FlowResult<Option<A>> {
        Ok(None)
    }
}

/// Runs the same traversal once per parameter set, one after the other.
///
/// Each run sees the set merged over the flow's own parameters. The inner
/// flow's hooks are not involved; only the batch hooks run, once.
pub struct BatchFlow<C, A, H> {
    flow: Flow<C, A>,
    hooks: H,
}

impl<C, A, H> BatchFlow<C, A, H>
where
    A: ActionType,
    H: BatchFlowHooks<C, A>,
{
    pub fn new(graph: Graph<C, A>, start: NodeId, hooks: H) -> FlowResult<Self> {
        Ok(BatchFlow {
            flow: Flow::new(graph, start)?,
            hooks,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.flow = self.flow.with_name(name);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.flow = self.flow.with_params(params);
        self
    }

    pub fn with_delay(mut self, delay: impl Delay + 'static) -> Self {
        self.flow = self.flow.with_delay(delay);
        self
    }

    pub fn flow(&self) -> &Flow<C, A> {
        &self.flow
    }

    pub fn run(&self, ctx: &C) -> FlowResult<Option<A>> {
        self.execute(ctx, &Params::new(), self.flow.delay())
    }

    fn execute(&self, ctx: &C, params: &Params, delay: &dyn Delay) -> FlowResult<Option<A>> {
        let span = info_span!("batch_flow", flow = self.flow.name(), run_id = %Uuid::new_v4());
        let _guard = span.enter();
        let params = self.flow.params().merged(params);
        let sets = self.hooks.prep(ctx, &params)?;
        debug!(runs = sets.len(), "running batch flow");
        for set in &sets {
            self.flow.orchestrate(ctx, &params.merged(set), delay)?;
        }
        self.hooks.post(ctx, &params, sets)
    }
}

impl<C, A: fmt::Debug, H> fmt::Debug for BatchFlow<C, A, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchFlow").field("flow", &self.flow).finish()
    }
}

impl<C, A, H> Step<C, A> for BatchFlow<C, A, H>
where
    A: ActionType,
    H: BatchFlowHooks<C, A>,
{
    fn name(&self) -> &str {
        self.flow.name()
    }

    fn run_step(&self, ctx: &C, params: &Params, delay: &dyn Delay) -> FlowResult<Option<A>> {
        self.execute(ctx, params, delay)
    }
}

#[async_trait]
impl<C, A, H> AsyncStep<C, A> for BatchFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
    H: BatchFlowHooks<C, A>,
{
    fn name(&self) -> &str {
        self.flow.name()
    }

    async fn run_step(
        &self,
        ctx: &C,
        params: &Params,
        _delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        self.execute(ctx, params, self.flow.delay())
    }
}
