//! Bounded fan-out/fan-in over Tokio tasks.
//!
//! Tasks are spawned onto a [`JoinSet`] and gated by a semaphore. Completion
//! order is arbitrary; callers aggregate by key. A task returning `Err` or
//! panicking aborts every sibling and fails the whole batch. A deadline or
//! cancellation stops the batch and returns what had completed so far.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use veriforge_domain::{Result, VerifyError};

use crate::deadline::{bounded, CancelSignal, Deadline, Interrupted};

/// Completed results of a batch, plus the reason it stopped early, if any.
#[derive(Debug)]
pub struct PoolOutcome<T> {
    pub completed: Vec<T>,
    pub interrupted: Option<Interrupted>,
}

/// Run `tasks` with at most `max_concurrent` in flight.
pub async fn run_bounded<T, Fut>(
    tasks: Vec<Fut>,
    max_concurrent: usize,
    deadline: Deadline,
    cancel: &CancelSignal,
) -> Result<PoolOutcome<T>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let sem = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut set = JoinSet::new();
    let total = tasks.len();

    for task in tasks {
        let sem = Arc::clone(&sem);
        set.spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| VerifyError::TaskFailed(e.to_string()))?;
            task.await
        });
    }

    let mut completed = Vec::with_capacity(total);
    let mut interrupted = None;

    loop {
        match bounded(deadline, cancel, set.join_next()).await {
            Ok(Some(Ok(Ok(value)))) => completed.push(value),
            Ok(Some(Ok(Err(err)))) => {
                set.abort_all();
                return Err(err);
            }
            Ok(Some(Err(join_err))) => {
                set.abort_all();
                return Err(VerifyError::TaskFailed(join_err.to_string()));
            }
            Ok(None) => break,
            Err(reason) => {
                debug!(
                    completed = completed.len(),
                    total = total,
                    reason = ?reason,
                    "worker pool interrupted"
                );
                set.abort_all();
                interrupted = Some(reason);
                break;
            }
        }
    }

    Ok(PoolOutcome {
        completed,
        interrupted,
    })
}
