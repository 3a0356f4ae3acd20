//! Bounded retry with a fixed wait and a fallback.
//!
//! Every node family runs its exec phase through the same loop: up to
//! `max_retries` attempts, a wait between attempts, then the node's
//! `exec_fallback` once the attempts are used up. How the wait is spent is an
//! injectable strategy: [`Delay`] for ordinary flows, [`AsyncDelay`] for the
//! suspension-capable ones.
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::ActionType;
use crate::async_node::AsyncNode;
use crate::error::{FlowError, FlowResult};
use crate::node::Node;
use crate::params::Params;

/// Policy controlling how often a node's exec phase is attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    max_retries: usize,
    wait: Duration,
}

impl RetryPolicy {
    /// `max_retries` counts every attempt including the first; zero is treated as one.
    pub fn new(max_retries: usize, wait: Duration) -> Self {
        RetryPolicy {
            max_retries: max_retries.max(1),
            wait,
        }
    }

    /// Retry without waiting between attempts.
    pub fn attempts(max_retries: usize) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries.max(1)
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Blocking wait strategy used by ordinary (non-suspending) flows.
pub trait Delay: Send + Sync {
    fn wait(&self, dur: Duration);
}

/// Suspending wait strategy used by async flows.
#[async_trait]
pub trait AsyncDelay: Send + Sync {
    async fn wait(&self, dur: Duration);
}

/// Parks the current thread for the wait.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleep;

impl Delay for ThreadSleep {
    fn wait(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

/// Suspends on the tokio timer for the wait.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleep;

#[async_trait]
impl AsyncDelay for TokioSleep {
    async fn wait(&self, dur: Duration) {
        tokio::time::sleep(dur).await;
    }
}

/// Retries immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDelay;

impl Delay for NoDelay {
    fn wait(&self, _dur: Duration) {}
}

#[async_trait]
impl AsyncDelay for NoDelay {
    async fn wait(&self, _dur: Duration) {}
}

/// Run `exec` under `policy`, handing the last error to `fallback`.
pub(crate) fn execute<T>(
    node: &str,
    policy: &RetryPolicy,
    delay: &dyn Delay,
    mut exec: impl FnMut() -> FlowResult<T>,
    fallback: impl FnOnce(FlowError) -> FlowResult<T>,
) -> FlowResult<T> {
    let max_retries = policy.max_retries();
    let mut attempt = 0;
    loop {
        match exec() {
            Ok(out) => return Ok(out),
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    tracing::warn!(
                        node,
                        attempt,
                        error = %e,
                        "retries exhausted, running fallback"
                    );
                    return fallback(e);
                }
                tracing::debug!(
                    node,
                    attempt,
                    wait = ?policy.wait(),
                    error = %e,
                    "exec failed, retrying"
                );
                if !policy.wait().is_zero() {
                    delay.wait(policy.wait());
                }
            }
        }
    }
}

/// Suspending counterpart of [`execute`].
pub(crate) async fn execute_async<T, E, EF, F, FF>(
    node: &str,
    policy: &RetryPolicy,
    delay: &dyn AsyncDelay,
    mut exec: E,
    fallback: F,
) -> FlowResult<T>
where
    E: FnMut() -> EF,
    EF: Future<Output = FlowResult<T>>,
    F: FnOnce(FlowError) -> FF,
    FF: Future<Output = FlowResult<T>>,
{
    let max_retries = policy.max_retries();
    let mut attempt = 0;
    loop {
        match exec().await {
            Ok(out) => return Ok(out),
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    tracing::warn!(
                        node,
                        attempt,
                        error = %e,
                        "retries exhausted, running fallback"
                    );
                    return fallback(e).await;
                }
                tracing::debug!(
                    node,
                    attempt,
                    wait = ?policy.wait(),
                    error = %e,
                    "exec failed, retrying"
                );
                if !policy.wait().is_zero() {
                    delay.wait(policy.wait()).await;
                }
            }
        }
    }
}

/// Wrap an existing node so its exec phase runs under `policy`.
///
/// # Example
///
/// ```ignore
/// let fetch = with_retry(FetchNode::new(url), RetryPolicy::new(3, Duration::from_millis(200)));
/// let id = graph.add_node(fetch);
/// ```
pub fn with_retry<N>(node: N, policy: RetryPolicy) -> RetryNode<N> {
    RetryNode::new(node, policy)
}

/// Wrapper node that replaces the inner node's retry policy.
#[derive(Clone, Debug)]
pub struct RetryNode<N> {
    pub inner: N,
    pub policy: RetryPolicy,
}

impl<N> RetryNode<N> {
    pub fn new(inner: N, policy: RetryPolicy) -> Self {
        RetryNode { inner, policy }
    }
}

impl<C, A, N> Node<C, A> for RetryNode<N>
where
    A: ActionType,
    N: Node<C, A>,
{
    type Prep = N::Prep;
    type Exec = N::Exec;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    fn prep(&self, ctx: &C, params: &Params) -> FlowResult<Self::Prep> {
        self.inner.prep(ctx, params)
    }

    fn exec(&self, prep: &Self::Prep) -> FlowResult<Self::Exec> {
        self.inner.exec(prep)
    }

    fn exec_fallback(&self, prep: &Self::Prep, error: FlowError) -> FlowResult<Self::Exec> {
        self.inner.exec_fallback(prep, error)
    }

    fn post(
        &self,
        ctx: &C,
        params: &Params,
        prep: Self::Prep,
        exec: Self::Exec,
    ) -> FlowResult<Option<A>> {
        self.inner.post(ctx, params, prep, exec)
    }
}

#[async_trait]
impl<C, A, N> AsyncNode<C, A> for RetryNode<N>
where
    C: Send + Sync + 'static,
    A: ActionType,
    N: AsyncNode<C, A>,
{
    type Prep = N::Prep;
    type Exec = N::Exec;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn prep(&self, ctx: &C, params: &Params) -> FlowResult<Self::Prep> {
        self.inner.prep(ctx, params).await
    }

    async fn exec(&self, prep: &Self::Prep) -> FlowResult<Self::Exec> {
        self.inner.exec(prep).await
    }

    async fn exec_fallback(&self, prep: &Self::Prep, error: FlowError) -> FlowResult<Self::Exec> {
        self.inner.exec_fallback(prep, error).await
    }

    async fn post(
        &self,
        ctx: &C,
        params: &Params,
        prep: Self::Prep,
        exec: Self::Exec,
    ) -> FlowResult<Option<A>> {
        self.inner.post(ctx, params, prep, exec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDelay {
        waits: Mutex<Vec<Duration>>,
    }

    impl Delay for RecordingDelay {
        fn wait(&self, dur: Duration) {
            self.waits.lock().unwrap().push(dur);
        }
    }

    #[test]
    fn test_policy_clamps_to_one_attempt() {
        assert_eq!(RetryPolicy::attempts(0).max_retries(), 1);
        assert_eq!(RetryPolicy::default().max_retries(), 1);
        assert_eq!(RetryPolicy::default().wait(), Duration::ZERO);
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_retries": 4}"#).unwrap();
        assert_eq!(policy, RetryPolicy::attempts(4));
    }

    #[test]
    fn test_succeeds_on_last_attempt() {
        let delay = RecordingDelay::default();
        let policy = RetryPolicy::new(3, Duration::from_millis(5));
        let mut calls = 0;
        let out = execute(
            "flaky",
            &policy,
            &delay,
            || {
                calls += 1;
                if calls < 3 {
                    Err(FlowError::generic(format!("failure #{calls}")))
                } else {
                    Ok(calls)
                }
            },
            |_| panic!("fallback must not run"),
        )
        .unwrap();

        assert_eq!(out, 3);
        assert_eq!(calls, 3);
        assert_eq!(*delay.waits.lock().unwrap(), vec![Duration::from_millis(5); 2]);
    }

    #[test]
    fn test_fallback_receives_final_error() {
        let delay = RecordingDelay::default();
        let mut calls = 0;
        let out = execute(
            "broken",
            &RetryPolicy::attempts(2),
            &delay,
            || {
                calls += 1;
                Err::<u32, _>(FlowError::generic(format!("failure #{calls}")))
            },
            |e| {
                assert_eq!(e, FlowError::generic("failure #2"));
                Ok(0)
            },
        )
        .unwrap();

        assert_eq!(out, 0);
        assert_eq!(calls, 2);
        // zero wait never reaches the delay strategy
        assert!(delay.waits.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_retry_waits_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        let mut calls = 0;
        let result: FlowResult<u32> = execute_async(
            "broken",
            &policy,
            &TokioSleep,
            || {
                calls += 1;
                async { Err(FlowError::generic("down")) }
            },
            |e| async move { Err(e) },
        )
        .await;

        assert_eq!(result, Err(FlowError::generic("down")));
        assert_eq!(calls, 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }
}
