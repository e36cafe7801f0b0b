//! The single bounded-fan-out primitive shared by Phases 3, 5, and 6 (§5,
//! §9 "Bounded fan-out primitive"): a counting semaphore gates concurrency,
//! results land in pre-sized slots indexed by position (never by completion
//! order), and a shared [`CancellationToken`] is checked before each permit
//! acquisition.

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;

/// Run `f(item)` for every item in `items`, at most `limit` concurrently,
/// returning results in input order. If `cancellation` fires before an
/// item's task starts, that item's slot is left `None`'s error variant —
/// [`ExtractError::Cancelled`] — without ever calling `f`.
///
/// This does not implement "first-error-wins" itself (callers that need that,
/// like Phase 5, inspect the returned `Vec` and return the first `Err` found
/// while treating later ones as swallowed, per §4.7).
pub async fn bounded_fan_out<T, F, Fut>(
    items: Vec<T>,
    limit: usize,
    cancellation: CancellationToken,
    f: F,
) -> Vec<Result<Fut::Output, ExtractError>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let limit = limit.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let f = Arc::new(f);
    let mut tasks = FuturesUnordered::new();

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let f = f.clone();
        let cancellation = cancellation.clone();
        tasks.push(tokio::spawn(async move {
            if cancellation.is_cancelled() {
                return (index, Err(ExtractError::Cancelled));
            }
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (index, Err(ExtractError::Cancelled));
            };
            if cancellation.is_cancelled() {
                return (index, Err(ExtractError::Cancelled));
            }
            let output = f(item).await;
            (index, Ok(output))
        }));
    }

    let mut slots: Vec<Option<Result<Fut::Output, ExtractError>>> =
        (0..tasks.len()).map(|_| None).collect();

    while let Some(joined) = tasks.next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(join_err) => {
                tracing::warn!("bounded_fan_out task panicked or was aborted: {join_err}");
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(ExtractError::Cancelled)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn preserves_input_order_regardless_of_completion_order() {
        let items = vec![30u64, 10, 20];
        let results = bounded_fan_out(items, 3, CancellationToken::new(), |delay_ms| async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            delay_ms
        })
        .await;

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn respects_the_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..8).collect();

        let in_flight_clone = in_flight.clone();
        let max_observed_clone = max_observed.clone();
        let _results = bounded_fan_out(items, 2, CancellationToken::new(), move |_| {
            let in_flight = in_flight_clone.clone();
            let max_observed = max_observed_clone.clone();
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn a_pre_cancelled_token_yields_cancelled_everywhere() {
        let token = CancellationToken::new();
        token.cancel();
        let items = vec![1, 2, 3];
        let results = bounded_fan_out(items, 2, token, |n| async move { n }).await;
        assert!(results.iter().all(|r| matches!(r, Err(ExtractError::Cancelled))));
    }
}
