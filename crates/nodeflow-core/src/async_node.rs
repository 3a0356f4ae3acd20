use async_trait::async_trait;

use crate::action::{ActionType, DefaultAction};
use crate::batch::{BatchNode, BatchStep};
use crate::error::{FlowError, FlowResult};
use crate::graph::{AsyncGraph, NodeId};
use crate::node::{Node, NodeStep};
use crate::parallel::{self, Concurrency};
use crate::params::Params;
use crate::retry::{self, AsyncDelay, RetryPolicy, TokioSleep};

/// Suspension-capable counterpart of [`Node`]: every phase may await.
#[async_trait]
pub trait AsyncNode<C, A = DefaultAction>: Send + Sync
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    type Prep: Default + Send + Sync;
    type Exec: Default + Send;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    async fn prep(&self, _ctx: &C, _params: &Params) -> FlowResult<Self::Prep> {
        Ok(Self::Prep::default())
    }

    async fn exec(&self, _prep: &Self::Prep) -> FlowResult<Self::Exec> {
        Ok(Self::Exec::default())
    }

    async fn exec_fallback(&self, _prep: &Self::Prep, error: FlowError) -> FlowResult<Self::Exec> {
        Err(error)
    }

    async fn post(
        &self,
        _ctx: &C,
        _params: &Params,
        _prep: Self::Prep,
        _exec: Self::Exec,
    ) -> FlowResult<Option<A>> {
        Ok(None)
    }
}

/// Suspension-capable batch node: `prep` yields the items, `exec` runs per item.
///
/// Registered with [`AsyncGraph::add_batch_node`] the items run one after the
/// other; with [`AsyncGraph::add_parallel_batch_node`] they run concurrently.
/// Either way `post` sees the outputs in item order.
#[async_trait]
pub trait AsyncBatchNode<C, A = DefaultAction>: Send + Sync
where
    C: Send + Sync + 'static,
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

    async fn prep(&self, _ctx: &C, _params: &Params) -> FlowResult<Vec<Self::Item>> {
        Ok(Vec::new())
    }

    async fn exec(&self, item: &Self::Item) -> FlowResult<Self::Output>;

    async fn exec_fallback(
        &self,
        _item: &Self::Item,
        error: FlowError,
    ) -> FlowResult<Self::Output> {
        Err(error)
    }

    async fn post(
        &self,
        _ctx: &C,
        _params: &Params,
        _items: Vec<Self::Item>,
        _outputs: Vec<Self::Output>,
    ) -> FlowResult<Option<A>> {
        Ok(None)
    }
}

/// Object-safe form of anything an async flow can run as one step.
#[async_trait]
pub trait AsyncStep<C, A>: Send + Sync
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    fn name(&self) -> &str;

    async fn run_step(
        &self,
        ctx: &C,
        params: &Params,
        delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>>;
}

/// Adapter running an [`AsyncNode`] as a graph step.
#[derive(Clone, Debug)]
pub struct AsyncNodeStep<N> {
    node: N,
}

impl<N> AsyncNodeStep<N> {
    pub fn new(node: N) -> Self {
        AsyncNodeStep { node }
    }

    pub fn inner(&self) -> &N {
        &self.node
    }
}

#[async_trait]
impl<C, A, N> AsyncStep<C, A> for AsyncNodeStep<N>
where
    C: Send + Sync + 'static,
    A: ActionType,
    N: AsyncNode<C, A>,
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
        tracing::debug!(node = node.name(), "prep");
        let prep = node.prep(ctx, params).await?;
        let prep_ref = &prep;
        let exec = retry::execute_async(
            node.name(),
            &policy,
            delay,
            move || node.exec(prep_ref),
            move |e| node.exec_fallback(prep_ref, e),
        )
        .await?;
        tracing::debug!(node = node.name(), "post");
        node.post(ctx, params, prep, exec).await
    }
}

/// Adapter running an [`AsyncBatchNode`] item by item.
#[derive(Clone, Debug)]
pub struct AsyncBatchStep<N> {
    node: N,
}

impl<N> AsyncBatchStep<N> {
    pub fn new(node: N) -> Self {
        AsyncBatchStep { node }
    }
}

#[async_trait]
impl<C, A, N> AsyncStep<C, A> for AsyncBatchStep<N>
where
    C: Send + Sync + 'static,
    A: ActionType,
    N: AsyncBatchNode<C, A>,
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
        let items = node.prep(ctx, params).await?;
        tracing::debug!(node = node.name(), items = items.len(), "running batch sequentially");
        let mut outputs = Vec::with_capacity(items.len());
        for item in &items {
            let output = retry::execute_async(
                node.name(),
                &policy,
                delay,
                move || node.exec(item),
                move |e| node.exec_fallback(item, e),
            )
            .await?;
            outputs.push(output);
        }
        node.post(ctx, params, items, outputs).await
    }
}

/// Adapter fanning an [`AsyncBatchNode`]'s items out concurrently and joining
/// them in item order.
#[derive(Clone, Debug)]
pub struct ParallelBatchStep<N> {
    node: N,
    concurrency: Concurrency,
}

impl<N> ParallelBatchStep<N> {
    pub fn new(node: N, concurrency: Concurrency) -> Self {
        ParallelBatchStep { node, concurrency }
    }
}

#[async_trait]
impl<C, A, N> AsyncStep<C, A> for ParallelBatchStep<N>
where
    C: Send + Sync + 'static,
    A: ActionType,
    N: AsyncBatchNode<C, A>,
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
        let policy = &policy;
        let items = node.prep(ctx, params).await?;
        tracing::debug!(
            node = node.name(),
            items = items.len(),
            concurrency = ?self.concurrency,
            "fanning out batch"
        );
        let attempts: Vec<_> = items
            .iter()
            .map(move |item| {
                retry::execute_async(
                    node.name(),
                    policy,
                    delay,
                    move || node.exec(item),
                    move |e| node.exec_fallback(item, e),
                )
            })
            .collect();
        let outputs = parallel::join_ordered(attempts, self.concurrency).await?;
        node.post(ctx, params, items, outputs).await
    }
}

impl<C, A> AsyncGraph<C, A>
where
    C: Send + Sync + 'static,
    A: ActionType,
{
    /// Register a suspension-capable node.
    pub fn add_node<N: AsyncNode<C, A> + 'static>(&mut self, node: N) -> NodeId {
        self.add_step(AsyncNodeStep::new(node))
    }

    /// Register an ordinary node; its phases run without suspending.
    pub fn add_sync_node<N: Node<C, A> + 'static>(&mut self, node: N) -> NodeId {
        self.add_step(NodeStep::new(node))
    }

    /// Register an ordinary batch node; items run one after the other.
    pub fn add_sync_batch_node<N: BatchNode<C, A> + 'static>(&mut self, node: N) -> NodeId {
        self.add_step(BatchStep::new(node))
    }

    /// Register a batch node whose items run one after the other.
    pub fn add_batch_node<N: AsyncBatchNode<C, A> + 'static>(&mut self, node: N) -> NodeId {
        self.add_step(AsyncBatchStep::new(node))
    }

    /// Register a batch node whose items run concurrently.
    pub fn add_parallel_batch_node<N: AsyncBatchNode<C, A> + 'static>(
        &mut self,
        node: N,
        concurrency: Concurrency,
    ) -> NodeId {
        self.add_step(ParallelBatchStep::new(node, concurrency))
    }

    /// Register any step, including nested flows of either family.
    pub fn add_step<S: AsyncStep<C, A> + 'static>(&mut self, step: S) -> NodeId {
        self.add_shared(std::sync::Arc::new(step))
    }

    /// Run one node's lifecycle in isolation, without following successors.
    pub async fn run_node(&self, id: NodeId, ctx: &C) -> FlowResult<Option<A>> {
        self.run_node_with(id, ctx, &Params::new(), &TokioSleep).await
    }

    pub async fn run_node_with(
        &self,
        id: NodeId,
        ctx: &C,
        params: &Params,
        delay: &dyn AsyncDelay,
    ) -> FlowResult<Option<A>> {
        let step = self.step(id)?;
        if self.has_successors(id) {
            tracing::warn!(
                node = step.name(),
                node_id = %id,
                "node won't run successors, use an AsyncFlow"
            );
        }
        let params = self.params(id)?.merged(params);
        step.run_step(ctx, &params, delay).await
    }
}
