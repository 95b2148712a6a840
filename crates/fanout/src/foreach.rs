//! Bounded-concurrency, order-preserving parallel map.
//!
//! Every input item is handed to one worker task. At most `concurrency`
//! workers run at once (see [`AdmissionPool`]). The output always has one entry
//! per input, in input order, whatever order the workers finish in.
//!
//! Item-level failures never fail the call:
//! - the transform returns `Err`: the item's slot gets the default
//! - the transform panics: the panic is contained at the task boundary and the
//!   slot gets the default
//! - cancellation is observed before the item starts: the slot gets the default
//!
//! Cancellation is cooperative. Once the token fires no new item is started;
//! items already running are left to finish under [`CancelPolicy::FinishInFlight`]
//! (the default). It bounds the growth of new work; it does not abort work in place.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::admission::{AdmissionPermit, AdmissionPool};
use crate::config::{CancelPolicy, ForeachConfig};
use crate::outcome::{ForeachSummary, ItemError, ItemResult};

/// Map `f` over `items` with at most `concurrency` transforms in flight.
///
/// Slots whose transform failed, panicked or was cancelled before starting hold
/// `default`. A `concurrency` of zero or less runs serially; more than the
/// number of items is clamped to it.
///
/// # Example
///
/// ```
/// use fanout::{CancellationToken, go_foreach};
///
/// # #[tokio::main]
/// # async fn main() {
/// let cancel = CancellationToken::new();
/// let doubled = go_foreach(
///     &cancel,
///     vec![1, 2, 3, 4, 5],
///     |_cancel, x: i32| async move { Ok::<_, String>(x * 2) },
///     -1,
///     2,
/// )
/// .await;
/// assert_eq!(doubled, vec![2, 4, 6, 8, 10]);
/// # }
/// ```
pub async fn go_foreach<T, R, E, F, Fut>(
    cancel: &CancellationToken,
    items: impl IntoIterator<Item = T>,
    f: F,
    default: R,
    concurrency: i64,
) -> Vec<R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
    E: Display + Send + 'static,
    F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    Foreach::new(concurrency)
        .map(cancel, items, f, default)
        .await
}

/// [`go_foreach`] for synchronous transforms, run on tokio's blocking pool.
pub async fn go_foreach_blocking<T, R, E, F>(
    cancel: &CancellationToken,
    items: impl IntoIterator<Item = T>,
    f: F,
    default: R,
    concurrency: i64,
) -> Vec<R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
    E: Display + Send + 'static,
    F: Fn(&CancellationToken, T) -> Result<R, E> + Send + Sync + 'static,
{
    Foreach::new(concurrency)
        .map_blocking(cancel, items, f, default)
        .await
}

/// Configurable foreach executor. Stateless between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct Foreach {
    config: ForeachConfig,
}

impl Foreach {
    pub fn new(concurrency: i64) -> Self {
        Self::with_config(ForeachConfig::new(concurrency))
    }

    pub fn with_config(config: ForeachConfig) -> Self {
        Self { config }
    }

    pub fn cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.config.cancel_policy = policy;
        self
    }

    pub fn config(&self) -> &ForeachConfig {
        &self.config
    }

    /// Map an async transform, substituting `default` for every item that
    /// produced no value.
    pub async fn map<T, R, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        items: impl IntoIterator<Item = T>,
        f: F,
        default: R,
    ) -> Vec<R>
    where
        T: Send + 'static,
        R: Clone + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        with_default(self.try_map(cancel, items, f).await, default)
    }

    /// Map an async transform, keeping the reason each failed item produced no value.
    pub async fn try_map<T, R, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        items: impl IntoIterator<Item = T>,
        f: F,
    ) -> Vec<ItemResult<R, E>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let f = Arc::new(f);
        let policy = self.config.cancel_policy;

        self.dispatch(cancel, items.into_iter().collect(), |item, permit, span| {
            let f = Arc::clone(&f);
            let token = cancel.clone();
            tokio::spawn(run_async(f, token, policy, item, permit).instrument(span))
        })
        .await
    }

    pub async fn map_blocking<T, R, E, F>(
        &self,
        cancel: &CancellationToken,
        items: impl IntoIterator<Item = T>,
        f: F,
        default: R,
    ) -> Vec<R>
    where
        T: Send + 'static,
        R: Clone + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(&CancellationToken, T) -> Result<R, E> + Send + Sync + 'static,
    {
        with_default(self.try_map_blocking(cancel, items, f).await, default)
    }

    pub async fn try_map_blocking<T, R, E, F>(
        &self,
        cancel: &CancellationToken,
        items: impl IntoIterator<Item = T>,
        f: F,
    ) -> Vec<ItemResult<R, E>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(&CancellationToken, T) -> Result<R, E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let policy = self.config.cancel_policy;

        self.dispatch(cancel, items.into_iter().collect(), |item, permit, span| {
            let f = Arc::clone(&f);
            let token = cancel.clone();
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                span.in_scope(|| run_blocking(f.as_ref(), &token, policy, item))
            })
        })
        .await
    }

    /// Admit and spawn one worker per item in index order, then collect the
    /// results positionally. Items never dispatched because of cancellation
    /// are filled with [`ItemError::Cancelled`].
    async fn dispatch<T, R, E, S>(
        &self,
        cancel: &CancellationToken,
        items: Vec<T>,
        mut spawn: S,
    ) -> Vec<ItemResult<R, E>>
    where
        R: Send + 'static,
        E: Display + Send + 'static,
        S: FnMut(T, AdmissionPermit, Span) -> JoinHandle<ItemResult<R, E>>,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let concurrency = self.config.effective_concurrency(total);
        let span = tracing::debug_span!("foreach", items = total, concurrency);

        async move {
            let pool = AdmissionPool::new(concurrency);
            let mut workers = Vec::with_capacity(total);

            for (index, item) in items.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                let permit = match pool.acquire(cancel).await {
                    Ok(permit) => permit,
                    Err(e) => {
                        tracing::debug!(index, reason = %e, "Stopped waiting for admission");
                        break;
                    }
                };
                workers.push(spawn(item, permit, tracing::trace_span!("item", index)));
            }

            let dispatched = workers.len();
            if dispatched < total {
                tracing::debug!(
                    dispatched,
                    skipped = total - dispatched,
                    "Cancelled before dispatch, remaining items take the default"
                );
            }

            let mut results: Vec<ItemResult<R, E>> = join_all(workers)
                .await
                .into_iter()
                .enumerate()
                .map(|(index, joined)| settle(index, joined))
                .collect();
            results.resize_with(total, || Err(ItemError::Cancelled));

            let summary = ForeachSummary::of(&results);
            tracing::debug!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                panicked = summary.panicked,
                cancelled = summary.cancelled,
                peak_in_flight = pool.peak(),
                "Foreach finished"
            );

            results
        }
        .instrument(span)
        .await
    }
}

fn with_default<R: Clone, E>(results: Vec<ItemResult<R, E>>, default: R) -> Vec<R> {
    results
        .into_iter()
        .map(|result| result.unwrap_or_else(|_| default.clone()))
        .collect()
}

async fn run_async<T, R, E, F, Fut>(
    f: Arc<F>,
    cancel: CancellationToken,
    policy: CancelPolicy,
    item: T,
    permit: AdmissionPermit,
) -> ItemResult<R, E>
where
    F: Fn(CancellationToken, T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let _permit = permit;

    // Time may have passed between admission and this task being polled.
    if cancel.is_cancelled() {
        return Err(ItemError::Cancelled);
    }

    let work = f(cancel.clone(), item);
    match policy {
        CancelPolicy::FinishInFlight => work.await.map_err(ItemError::Failed),
        CancelPolicy::AbortInFlight => {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => Err(ItemError::Cancelled),
                result = work => result.map_err(ItemError::Failed),
            }
        }
    }
}

fn run_blocking<T, R, E, F>(
    f: &F,
    cancel: &CancellationToken,
    policy: CancelPolicy,
    item: T,
) -> ItemResult<R, E>
where
    F: Fn(&CancellationToken, T) -> Result<R, E>,
{
    if cancel.is_cancelled() {
        return Err(ItemError::Cancelled);
    }

    let result = f(cancel, item).map_err(ItemError::Failed);
    if policy == CancelPolicy::AbortInFlight && cancel.is_cancelled() {
        return Err(ItemError::Cancelled);
    }
    result
}

fn settle<R, E: Display>(
    index: usize,
    joined: Result<ItemResult<R, E>, JoinError>,
) -> ItemResult<R, E> {
    match joined {
        Ok(Err(ItemError::Failed(e))) => {
            tracing::debug!(index, error = %e, "Item transform failed");
            Err(ItemError::Failed(e))
        }
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            tracing::warn!(index, panic = %message, "Item transform panicked");
            Err(ItemError::Panicked(message))
        }
        Err(e) => {
            tracing::warn!(index, error = %e, "Item worker aborted");
            Err(ItemError::Cancelled)
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
    }
}
