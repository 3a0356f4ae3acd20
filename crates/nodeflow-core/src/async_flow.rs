use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::action::{ActionType, DefaultAction};
use crate::async_node::AsyncStep;
use crate::error::FlowResult;
use crate::graph::{AsyncGraph, NodeId};
use crate::parallel::{self, Concurrency};
use crate::params::Params;
use crate::retry::{AsyncDelay, TokioSleep};

/// Suspension-capable counterpart of [`crate::FlowHooks`].
#[async_trait]
pub trait AsyncFlowHooks<C, A = DefaultAction>: Send + Sync
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    type Prep: Default + Send + Sync;

    async fn prep(&self, _ctx: &C, _params: &Params) -> FlowResult<Self::Prep> {
        Ok(Self::Prep::default())
    }

    async fn post(
        &self,
        _ctx: &C,
        _params: &Params,
        _prep: Self::Prep,
        _last: Option<A>,
    ) -> FlowResult<Option<A>> {
        Ok(None)
    }
}

#[async_trait]
impl<C, A> AsyncFlowHooks<C, A> for ()
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    type Prep = ();
}

/// A flow whose steps may suspend.
///
/// The graph may mix suspension-capable nodes with ordinary nodes and
/// ordinary flows, see [`AsyncGraph`].
pub struct AsyncFlow<C, A = DefaultAction, H = ()>
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    name: String,
    graph: AsyncGraph<C, A>,
    start: NodeId,
    params: Params,
    hooks: H,
    delay: Arc<dyn AsyncDelay>,
}

impl<C, A> AsyncFlow<C, A>
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    pub fn new(graph: AsyncGraph<C, A>, start: NodeId) -> FlowResult<Self> {
        graph.check(start)?;
        Ok(AsyncFlow {
            name: "async_flow".to_string(),
            graph,
            start,
            params: Params::new(),
            hooks: (),
            delay: Arc::new(TokioSleep),
        })
    }
}

impl<C, A, H> AsyncFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    pub fn with_hooks<H2: AsyncFlowHooks<C, A>>(self, hooks: H2) -> AsyncFlow<C, A, H2> {
        AsyncFlow {
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

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Wait strategy used for retries when this flow is the entry point.
    pub fn with_delay(mut self, delay: impl AsyncDelay + 'static) -> Self {
        self.delay = Arc::new(delay);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &AsyncGraph<C, A> {
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

    pub(crate) fn delay(&self) -> &dyn AsyncDelay {
        self.delay.as_ref()
    }

    pub(crate) async fn orchestrate(
        &self,
        ctx: &C,
        params: &Params,
        delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        let mut current = self.start;
        loop {
            let step = self.graph.step(current)?;
            let step_params = self.graph.step_params(current, params)?;
            debug!(node = step.name(), node_id = %current, "running node");
            let action = step.run_step(ctx, &step_params, delay).await?;
            match self.graph.next(current, action.clone()) {
                Some(next) => current = next,
                None => return Ok(action),
            }
        }
    }
}

impl<C, A, H> AsyncFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
    H: AsyncFlowHooks<C, A>,
{
    pub async fn run(&self, ctx: &C) -> FlowResult<Option<A>> {
        self.run_with_params(ctx, &Params::new()).await
    }

    pub async fn run_with_params(&self, ctx: &C, params: &Params) -> FlowResult<Option<A>> {
        self.execute(ctx, params, self.delay.as_ref()).await
    }

    async fn execute(
        &self,
        ctx: &C,
        params: &Params,
        delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        let span = info_span!("flow", flow = %self.name, run_id = %Uuid::new_v4());
        async move {
            let params = self.params.merged(params);
            let prep = self.hooks.prep(ctx, &params).await?;
            let last = self.orchestrate(ctx, &params, delay).await?;
            debug!(last = ?last, "traversal finished");
            self.hooks.post(ctx, &params, prep, last).await
        }
        .instrument(span)
        .await
    }
}

impl<C, A, H> fmt::Debug for AsyncFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFlow")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("graph", &self.graph)
            .field("params", &self.params)
            .finish()
    }
}

#[async_trait]
impl<C, A, H> AsyncStep<C, A> for AsyncFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
    H: AsyncFlowHooks<C, A>,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_step(
        &self,
        ctx: &C,
        params: &Params,
        delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        self.execute(ctx, params, delay).await
    }
}

/// Hooks of the async batch flows: `prep` produces one parameter set per run.
#[async_trait]
pub trait AsyncBatchFlowHooks<C, A = DefaultAction>: Send + Sync
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    async fn prep(&self, ctx: &C, params: &Params) -> FlowResult<Vec<Params>>;

    async fn post(&self, _ctx: &C, _params: &Params, _sets: Vec<Params>) -> FlowResult<Option<A>> {
        Ok(None)
    }
}

/// Runs the traversal once per parameter set, one run after the other.
pub struct AsyncBatchFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    flow: AsyncFlow<C, A>,
    hooks: H,
}

impl<C, A, H> AsyncBatchFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
    H: AsyncBatchFlowHooks<C, A>,
{
    pub fn new(graph: AsyncGraph<C, A>, start: NodeId, hooks: H) -> FlowResult<Self> {
        Ok(AsyncBatchFlow {
            flow: AsyncFlow::new(graph, start)?.with_name("async_batch_flow"),
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

    pub fn with_delay(mut self, delay: impl AsyncDelay + 'static) -> Self {
        self.flow = self.flow.with_delay(delay);
        self
    }

    pub fn flow(&self) -> &AsyncFlow<C, A> {
        &self.flow
    }

    pub async fn run(&self, ctx: &C) -> FlowResult<Option<A>> {
        self.execute(ctx, &Params::new(), self.flow.delay()).await
    }

    async fn execute(
        &self,
        ctx: &C,
        params: &Params,
        delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        let span = info_span!("batch_flow", flow = self.flow.name(), run_id = %Uuid::new_v4());
        async move {
            let params = self.flow.params().merged(params);
            let sets = self.hooks.prep(ctx, &params).await?;
            debug!(runs = sets.len(), "running batch flow sequentially");
            for set in &sets {
                self.flow.orchestrate(ctx, &params.merged(set), delay).await?;
            }
            self.hooks.post(ctx, &params, sets).await
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<C, A, H> AsyncStep<C, A> for AsyncBatchFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
    H: AsyncBatchFlowHooks<C, A>,
{
    fn name(&self) -> &str {
        self.flow.name()
    }

    async fn run_step(
        &self,
        ctx: &C,
        params: &Params,
        delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        self.execute(ctx, params, delay).await
    }
}

/// Runs the traversal once per parameter set, all runs concurrently.
///
/// Runs interleave on the calling task. The first failing run fails the
/// whole batch; the others are dropped.
pub struct AsyncParallelBatchFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    flow: AsyncFlow<C, A>,
    hooks: H,
    concurrency: Concurrency,
}

impl<C, A, H> AsyncParallelBatchFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
    H: AsyncBatchFlowHooks<C, A>,
{
    pub fn new(graph: AsyncGraph<C, A>, start: NodeId, hooks: H) -> FlowResult<Self> {
        Ok(AsyncParallelBatchFlow {
            flow: AsyncFlow::new(graph, start)?.with_name("async_parallel_batch_flow"),
            hooks,
            concurrency: Concurrency::default(),
        })
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.flow = self.flow.with_name(name);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.flow = self.flow.with_params(params);
        self
    }

    pub fn with_delay(mut self, delay: impl AsyncDelay + 'static) -> Self {
        self.flow = self.flow.with_delay(delay);
        self
    }

    pub fn flow(&self) -> &AsyncFlow<C, A> {
        &self.flow
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    pub async fn run(&self, ctx: &C) -> FlowResult<Option<A>> {
        self.execute(ctx, &Params::new(), self.flow.delay()).await
    }

    async fn execute(
        &self,
        ctx: &C,
        params: &Params,
        delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        let span = info_span!(
            "parallel_batch_flow",
            flow = self.flow.name(),
            run_id = %Uuid::new_v4()
        );
        async move {
            let params = self.flow.params().merged(params);
            let sets = self.hooks.prep(ctx, &params).await?;
            debug!(runs = sets.len(), concurrency = ?self.concurrency, "fanning out batch flow");
            let flow = &self.flow;
            let base = &params;
            let runs: Vec<_> = sets
                .iter()
                .map(move |set| {
                    let merged = base.merged(set);
                    async move { flow.orchestrate(ctx, &merged, delay).await }
                })
                .collect();
            parallel::join_ordered(runs, self.concurrency).await?;
            self.hooks.post(ctx, &params, sets).await
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<C, A, H> AsyncStep<C, A> for AsyncParallelBatchFlow<C, A, H>
where
    C: Send + Sync + 'static,
    A: ActionType,
    H: AsyncBatchFlowHooks<C, A>,
{
    fn name(&self) -> &str {
        self.flow.name()
    }

    async fn run_step(
        &self,
        ctx: &C,
        params: &Params,
        delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        self.execute(ctx, params, delay).await
    }
}
