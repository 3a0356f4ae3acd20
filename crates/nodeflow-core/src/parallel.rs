use std::future::Future;
use std::num::NonZeroUsize;

use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::error::FlowResult;

/// How many items of a parallel batch may be in flight at once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    /// Launch every item at once
    #[default]
    Unbounded,
    /// At most this many items in flight
    Limited(NonZeroUsize),
}

impl Concurrency {
    /// A cap of `n` in-flight items; zero means unbounded.
    pub fn limited(n: usize) -> Self {
        NonZeroUsize::new(n).map_or(Self::Unbounded, Self::Limited)
    }
}

/// Drive `futures` concurrently on the current task and collect their outputs
/// in input order. The first error fails the join and drops the rest.
///
/// Takes the futures already collected: a lazy iterator would keep its
/// closure inside the returned future, which then fails the `Send` check of
/// the async step traits.
pub(crate) async fn join_ordered<F, T>(
    futures: Vec<F>,
    concurrency: Concurrency,
) -> FlowResult<Vec<T>>
where
    F: Future<Output = FlowResult<T>>,
{
    match concurrency {
        Concurrency::Unbounded => try_join_all(futures).await,
        Concurrency::Limited(limit) => {
            stream::iter(futures)
                .buffered(limit.get())
                .try_collect()
                .await
        }
    }
}
