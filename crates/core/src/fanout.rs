//! Fan-out/fan-in over independent I/O calls.
//!
//! Each item gets its own tokio task. Results come back over a channel with
//! one slot per task, so a worker never waits to report, and the caller
//! proceeds only once every worker has finished.

use std::future::Future;

use notes_common::{AppError, AppResult};
use tokio::sync::mpsc;

/// Run `task` once per item concurrently and wait for all of them.
///
/// Results are returned in input order. A task that panics or is cancelled
/// yields `AppError::Internal` in its slot.
pub async fn fan_out<T, R, F, Fut>(items: Vec<T>, task: F) -> Vec<AppResult<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = AppResult<R>> + Send + 'static,
{
    let count = items.len();
    if count == 0 {
        return Vec::new();
    }

    let (tx, mut rx) = mpsc::channel::<(usize, AppResult<R>)>(count);
    for (index, item) in items.into_iter().enumerate() {
        let tx = tx.clone();
        let work = task(item);
        tokio::spawn(async move {
            let result = work.await;
            // Capacity equals the worker count, so this never waits.
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let mut slots: Vec<Option<AppResult<R>>> = (0..count).map(|_| None).collect();
    while let Some((index, result)) = rx.recv().await {
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(result);
        }
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| Err(AppError::Internal("Worker task aborted".to_string())))
        })
        .collect()
}
