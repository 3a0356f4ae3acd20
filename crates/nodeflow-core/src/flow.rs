use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info_span};
use uuid::Uuid;

use crate::action::{ActionType, DefaultAction};
use crate::async_node::AsyncStep;
use crate::error::FlowResult;
use crate::graph::{Graph, NodeId};
use crate::node::Step;
use crate::params::Params;
use crate::retry::{AsyncDelay, Delay, ThreadSleep};

/// Optional prep/post hooks run once around a flow's traversal.
///
/// `post` receives the action the traversal ended on, so a sub-flow can pass
/// it on to route its parent. The default post returns `None`.
pub trait FlowHooks<C, A = DefaultAction>: Send + Sync
where
    A: ActionType,
{
    type Prep: Default + Send + Sync;

    fn prep(&self, _ctx: &C, _params: &Params) -> FlowResult<Self::Prep> {
        Ok(Self::Prep::default())
    }

    fn post(
        &self,
        _ctx: &C,
        _params: &Params,
        _prep: Self::Prep,
        _last: Option<A>,
    ) -> FlowResult<Option<A>> {
        Ok(None)
    }
}

impl<C, A: ActionType> FlowHooks<C, A> for () {
    type Prep = ();
}

/// A graph with a fixed start node, walked by action label.
///
/// A flow is itself a [`Step`], so it can be registered in another graph
/// and nested arbitrarily deep.
pub struct Flow<C, A = DefaultAction, H = ()> {
    name: String,
    graph: Graph<C, A>,
    start: NodeId,
    params: Params,
    hooks: H,
    delay: Arc<dyn Delay>,
}

impl<C, A> Flow<C, A>
where
    A: ActionType,
{
    /// Fails with [`crate::FlowError::UnknownNode`] if `start` is not in `graph`.
    pub fn new(graph: Graph<C, A>, start: NodeId) -> FlowResult<Self> {
        graph.check(start)?;
        Ok(Flow {
            name: "flow".to_string(),
            graph,
            start,
            params: Params::new(),
            hooks: (),
            delay: Arc::new(ThreadSleep),
        })
    }
}

impl<C, A, H> Flow<C, A, H>
where
    A: ActionType,
    H: FlowHooks<C, A>,
{
    pub fn with_hooks<H2: FlowHooks<C, A>>(self, hooks: H2) -> Flow<C, A, H2> {
        Flow {
            name: self.name,
            graph: self.graph,
            start: self.start,
            params: self.params,
            hooks,
            delay: self.delay,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Flow-level parameters, merged over each node's defaults.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Wait strategy used for retries when this flow is the entry point.
    pub fn with_delay(mut self, delay: impl Delay + 'static) -> Self {
        self.delay = Arc::new(delay);
        self
    }

    pub fn graph(&self) -> &Graph<C, A> {
        &self.graph
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn run(&self, ctx: &C) -> FlowResult<Option<A>> {
        self.run_with_params(ctx, &Params::new())
    }

    /// Run with extra parameters written over the flow's own.
    pub fn run_with_params(&self, ctx: &C, params: &Params) -> FlowResult<Option<A>> {
        self.execute(ctx, params, self.delay.as_ref())
    }

    fn execute(&self, ctx: &C, params: &Params, delay: &dyn Delay) -> FlowResult<Option<A>> {
        let span = info_span!("flow", flow = %self.name, run_id = %Uuid::new_v4());
        let _guard = span.enter();
        let params = self.params.merged(params);
        let prep = self.hooks.prep(ctx, &params)?;
        let last = self.orchestrate(ctx, &params, delay)?;
        debug!(last = ?last, "traversal finished");
        self.hooks.post(ctx, &params, prep, last)
    }
}

impl<C, A, H> Flow<C, A, H>
where
    A: ActionType,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn delay(&self) -> &dyn Delay {
        self.delay.as_ref()
    }

    /// Walk the graph from the start node and return the action the last
    /// node chose.
    pub(crate) fn orchestrate(
        &self,
        ctx: &C,
        params: &Params,
        delay: &dyn Delay,
    ) -> FlowResult<Option<A>> {
        let mut current = self.start;
        loop {
            let step = self.graph.step(current)?;
            let step_params = self.graph.step_params(current, params)?;
            debug!(node = step.name(), node_id = %current, "running node");
            let action = step.run_step(ctx, &step_params, delay)?;
            match self.graph.next(current, action.clone()) {
                Some(next) => current = next,
                None => return Ok(action),
            }
        }
    }
}

impl<C, A: fmt::Debug, H> fmt::Debug for Flow<C, A, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("graph", &self.graph)
            .field("params", &self.params)
            .finish()
    }
}

impl<C, A, H> Step<C, A> for Flow<C, A, H>
where
    A: ActionType,
    H: FlowHooks<C, A>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run_step(&self, ctx: &C, params: &Params, delay: &dyn Delay) -> FlowResult<Option<A>> {
        self.execute(ctx, params, delay)
    }
}

// Inside an async flow the whole sub-flow runs without suspending, so its
// retry waits use its own blocking delay.
#[async_trait]
impl<C, A, H> AsyncStep<C, A> for Flow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
    H: FlowHooks<C, A>,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_step(
        &self,
        ctx: &C,
        params: &Params,
        _delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        self.execute(ctx, params, self.delay.as_ref())
    }
}
