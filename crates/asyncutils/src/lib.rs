//! Bounded-concurrency fan-out.
//!
//! A handful of callers across the workspace need to run the same async
//! operation over a batch of independent items (uploading a set of sidecar
//! files, fetching a set of presigned URLs) without unbounded parallelism.
//! This crate wraps the familiar `Arc<Semaphore>` + `acquire_owned` pattern
//! behind two small combinators so call sites don't re-derive it.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default concurrency cap when a caller doesn't configure one explicitly.
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Upper bound enforced by configuration validation; not enforced here.
pub const MAX_CONCURRENCY: usize = 16;

/// Outcome of one task in a fan-out batch, keeping the original item around
/// so the caller can report which item failed without threading an index.
pub struct Outcome<I, T, E> {
    pub item: I,
    pub result: Result<T, E>,
}

/// Run `f` over `items` with at most `concurrency` tasks in flight at once,
/// preserving input order in the returned `Vec`.
///
/// Every item runs; failures are not treated specially here (this is the
/// primitive `fan_out_lenient`/`fan_out_strict` are built on).
pub async fn fan_out<I, T, E, F, Fut>(items: Vec<I>, concurrency: usize, f: F) -> Vec<Outcome<I, T, E>>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let tasks = items.into_iter().map(|item| {
        let semaphore = Arc::clone(&semaphore);
        let item_for_result = item.clone();
        async move {
            // The semaphore is local to this call; the owned permit is only
            // ever dropped (never leaked), so `unwrap` here can't panic.
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let result = f(item).await;
            Outcome { item: item_for_result, result }
        }
    });
    join_all(tasks).await
}

/// Fan out and keep only the successes, logging a warning for each failure.
///
/// Matches the "upload associated files" policy: a bad sidecar should never
/// fail the whole request, it just doesn't show up in the result.
pub async fn fan_out_lenient<I, T, E, F, Fut>(items: Vec<I>, concurrency: usize, label: &str, f: F) -> Vec<T>
where
    I: Clone + std::fmt::Debug,
    E: std::fmt::Display,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    fan_out(items, concurrency, f)
        .await
        .into_iter()
        .filter_map(|outcome| match outcome.result {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(item = ?outcome.item, error = %err, "{label}: dropping failed item");
                None
            }
        })
        .collect()
}

/// Fan out; succeed only if at least one item succeeded, otherwise return
/// `on_all_failed()`.
///
/// Matches the "add associated files" policy: with no primary file to anchor
/// the request, a batch where every upload failed is itself a failure.
pub async fn fan_out_strict<I, T, E, F, Fut, OnFail>(
    items: Vec<I>,
    concurrency: usize,
    label: &str,
    f: F,
    on_all_failed: OnFail,
) -> Result<Vec<T>, E>
where
    I: Clone + std::fmt::Debug,
    E: std::fmt::Display,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    OnFail: FnOnce() -> E,
{
    let outcomes = fan_out(items, concurrency, f).await;
    let total = outcomes.len();
    let mut successes = Vec::with_capacity(total);
    let mut failures = 0usize;
    for outcome in outcomes {
        match outcome.result {
            Ok(value) => successes.push(value),
            Err(err) => {
                failures += 1;
                tracing::warn!(item = ?outcome.item, error = %err, "{label}: item failed");
            }
        }
    }
    if total > 0 && failures == total {
        return Err(on_all_failed());
    }
    Ok(successes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn lenient_drops_failures_keeps_successes() {
        let items = vec![1, 2, 3, 4];
        let out = fan_out_lenient(items, 2, "test", |n| async move {
            if n % 2 == 0 { Ok(n * 10) } else { Err("odd") }
        })
        .await;
        let mut out = out;
        out.sort_unstable();
        assert_eq!(out, vec![20, 40]);
    }

    #[tokio::test]
    async fn strict_errors_when_all_fail() {
        let items = vec![1, 2, 3];
        let result: Result<Vec<i32>, &'static str> =
            fan_out_strict(items, 2, "test", |_| async move { Err("nope") }, || "all failed").await;
        assert_eq!(result, Err("all failed"));
    }

    #[tokio::test]
    async fn strict_succeeds_with_partial_failures() {
        let items = vec![1, 2, 3];
        let result = fan_out_strict(items, 2, "test", |n| async move {
            if n == 1 { Ok(n) } else { Err("nope") }
        }, || "all failed")
        .await;
        assert_eq!(result, Ok(vec![1]));
    }

    #[rstest::rstest]
    #[case(1)]
    #[case(3)]
    #[case(16)]
    #[tokio::test]
    async fn concurrency_cap_is_respected(#[case] cap: usize) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..10).collect();
        let _ = fan_out(items, cap, |_| {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            }
        })
        .await;
        assert!(max_seen.load(Ordering::SeqCst) <= cap);
    }

    #[rstest::rstest]
    #[case(0, 0)]
    #[case(1000, 16)]
    #[tokio::test]
    async fn fan_out_clamps_zero_and_oversized_concurrency(#[case] requested: usize, #[case] expected_cap: usize) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..20).collect();
        let _ = fan_out(items, requested, |_| {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            }
        })
        .await;
        let expected_cap = if expected_cap == 0 { 1 } else { expected_cap };
        assert!(max_seen.load(Ordering::SeqCst) <= expected_cap);
    }
}
