//! Combinators over fallible tasks: `all`, `race`, `any`, `sequence`, and
//! bounded `map`
//!
//! These are generic over any `Future<Output = Result<T, E>>`, so they
//! compose client sends with arbitrary async work:
//!
//! ```rust
//! use fetch_http::task;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let tasks: Vec<_> =
//!     (1..=3).map(|n| async move { Ok::<_, String>(n * 10) }).collect();
//! assert_eq!(task::all(tasks).await, Ok(vec![10, 20, 30]));
//! # }
//! ```

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::TryStreamExt;

/// Default in-flight bound for [`map`]
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Waits for every task and resolves with their results in input order
///
/// If any task fails, the temporally first failure is returned, but only
/// after every task has completed; later results are discarded.
pub async fn all<T, E, F>(tasks: Vec<F>) -> Result<Vec<T>, E>
where
    F: Future<Output = Result<T, E>>,
{
    let total = tasks.len();
    let mut in_flight: FuturesUnordered<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| async move { (index, task.await) })
        .collect();
    let mut results: Vec<Option<T>> = Vec::new();
    results.resize_with(total, || None);
    let mut first_error = None;
    while let Some((index, result)) = in_flight.next().await {
        match result {
            Ok(value) => results[index] = Some(value),
            Err(error) => {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(results.into_iter().flatten().collect()),
    }
}

/// Settles with the first task to settle, success or failure; the rest are
/// dropped
///
/// # Panics
///
/// Panics when `tasks` is empty.
pub async fn race<T, E, F>(tasks: Vec<F>) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    assert!(!tasks.is_empty(), "race requires at least one task");
    let (settled, _, _) =
        futures::future::select_all(tasks.into_iter().map(Box::pin)).await;
    settled
}

/// Resolves with the first task to succeed; if every task fails, rejects
/// with all failures in input order
///
/// # Panics
///
/// Panics when `tasks` is empty.
pub async fn any<T, E, F>(tasks: Vec<F>) -> Result<T, Vec<E>>
where
    F: Future<Output = Result<T, E>>,
{
    assert!(!tasks.is_empty(), "any requires at least one task");
    let total = tasks.len();
    let mut in_flight: FuturesUnordered<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| async move { (index, task.await) })
        .collect();
    let mut errors: Vec<Option<E>> = Vec::new();
    errors.resize_with(total, || None);
    while let Some((index, result)) = in_flight.next().await {
        match result {
            Ok(value) => return Ok(value),
            Err(error) => errors[index] = Some(error),
        }
    }
    Err(errors.into_iter().flatten().collect())
}

/// Runs factories one after another; each factory sees every prior result
pub async fn sequence<T, E, F, Fut>(factories: Vec<F>) -> Result<Vec<T>, E>
where
    F: FnOnce(&[T]) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut results = Vec::with_capacity(factories.len());
    for factory in factories {
        let value = factory(&results).await?;
        results.push(value);
    }
    Ok(results)
}

/// Maps items through an async function with at most `concurrency` tasks in
/// flight, preserving input order in the results
pub async fn map<I, T, E, F, Fut>(
    items: I,
    concurrency: usize,
    f: F,
) -> Result<Vec<T>, E>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    futures::stream::iter(items)
        .map(f)
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}
