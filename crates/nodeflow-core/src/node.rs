use async_trait::async_trait;

use crate::action::{ActionType, DefaultAction};
use crate::async_node::AsyncStep;
use crate::error::{FlowError, FlowResult};
use crate::params::Params;
use crate::retry::{self, AsyncDelay, Delay, RetryPolicy};

/// A unit of work with a three-phase lifecycle.
///
/// `prep` reads what the node needs from the shared context, `exec` does the
/// work (and is the only phase that is retried), `post` writes results back
/// and picks the outgoing action. Returning `None` from `post` follows the
/// default edge. Every phase defaults to a no-op.
///
/// The no-op `prep` and `exec` return `Default::default()`, hence the bound on
/// both associated types. A type without a `Default` impl can be carried as
/// `Option<T>`.
pub trait Node<C, A = DefaultAction>: Send + Sync
where
    A: ActionType,
{
    /// Output of the preparation phase, handed to every exec attempt
    type Prep: Default + Send + Sync;

    /// Output of the execution phase (or of the fallback)
    type Exec: Default + Send;

    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn prep(&self, _ctx: &C, _params: &Params) -> FlowResult<Self::Prep> {
        Ok(Self::Prep::default())
    }

    fn exec(&self, _prep: &Self::Prep) -> FlowResult<Self::Exec> {
        Ok(Self::Exec::default())
    }

    /// Called once after the last failed attempt. Re-raises by default.
    fn exec_fallback(&self, _prep: &Self::Prep, error: FlowError) -> FlowResult<Self::Exec> {
        Err(error)
    }

    fn post(
        &self,
        _ctx: &C,
        _params: &Params,
        _prep: Self::Prep,
        _exec: Self::Exec,
    ) -> FlowResult<Option<A>> {
        Ok(None)
    }
}

/// Object-safe form of anything a synchronous flow can run as one step:
/// nodes, batch nodes and whole flows.
pub trait Step<C, A>: Send + Sync {
    fn name(&self) -> &str;

    /// Run the full lifecycle once with the given parameters and return the
    /// action chosen by post.
    fn run_step(&self, ctx: &C, params: &Params, delay: &dyn Delay) -> FlowResult<Option<A>>;
}

/// Adapter running a [`Node`] as a graph step.
#[derive(Clone, Debug)]
pub struct NodeStep<N> {
    node: N,
}

impl<N> NodeStep<N> {
    pub fn new(node: N) -> Self {
        NodeStep { node }
    }

    pub fn inner(&self) -> &N {
        &self.node
    }
}

impl<C, A, N> Step<C, A> for NodeStep<N>
where
    A: ActionType,
    N: Node<C, A>,
{
    fn name(&self) -> &str {
        self.node.name()
    }

    fn run_step(&self, ctx: &C, params: &Params, delay: &dyn Delay) -> FlowResult<Option<A>> {
        let node = &self.node;
        tracing::debug!(node = node.name(), "prep");
        let prep = node.prep(ctx, params)?;
        let exec = retry::execute(
            node.name(),
            &node.retry_policy(),
            delay,
            || node.exec(&prep),
            |e| node.exec_fallback(&prep, e),
        )?;
        tracing::debug!(node = node.name(), "post");
        node.post(ctx, params, prep, exec)
    }
}

// An ordinary node inside an async flow: phases stay synchronous, only the
// retry wait goes through the async delay.
#[async_trait]
impl<C, A, N> AsyncStep<C, A> for NodeStep<N>
where
    C: Send + Sync + 'static,
    A: ActionType,
    N: Node<C, A>,
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
        let prep = node.prep(ctx, params)?;
        let prep_ref = &prep;
        let exec = retry::execute_async(
            node.name(),
            &policy,
            delay,
            move || std::future::ready(node.exec(prep_ref)),
            move |e| std::future::ready(node.exec_fallback(prep_ref, e)),
        )
        .await?;
        node.post(ctx, params, prep, exec)
    }
}
