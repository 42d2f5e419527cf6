//! Bounded worker pool draining the task queue.
//!
//! The engine is synchronous, so each task runs on the blocking pool; a
//! semaphore caps how many run at once. Failed tasks are re-enqueued until
//! they run out of attempts.

use std::collections::HashMap;
use std::sync::Arc;

use costwatch_alerts::{AlertEngine, MemoryTaskQueue, RequestContext, Task, TaskOutcome, TaskQueue};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cli::WorkerArgs;

/// Totals of one queue drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Tasks that completed.
    pub completed: usize,
    /// Runs that failed, retried or not.
    pub failures: usize,
    /// Tasks dropped after their last attempt.
    pub dropped: Vec<Task>,
    /// Notifications written by refresh tasks.
    pub notifications_added: usize,
    /// Emails sent by digest tasks.
    pub emails_sent: usize,
}

/// Runs queued tasks until the queue is empty or `ctx` is cancelled.
pub async fn drain(
    engine: Arc<AlertEngine>,
    queue: Arc<MemoryTaskQueue>,
    ctx: RequestContext,
    args: WorkerArgs,
) -> DrainSummary {
    let semaphore = Arc::new(Semaphore::new(args.workers.max(1)));
    let mut attempts: HashMap<Task, u32> = HashMap::new();
    let mut summary = DrainSummary::default();

    loop {
        let batch = queue.drain();
        if batch.is_empty() || ctx.is_cancelled() {
            break;
        }
        debug!(tasks = batch.len(), "draining task batch");

        let mut running = JoinSet::new();
        for task in batch {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let engine = engine.clone();
            let ctx = ctx.child();
            running.spawn_blocking(move || {
                let _permit = permit;
                let outcome = engine.run_task(&ctx, &task);
                (task, outcome)
            });
        }

        while let Some(joined) = running.join_next().await {
            let (task, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "worker panicked");
                    summary.failures += 1;
                    continue;
                }
            };

            match outcome {
                Ok(TaskOutcome::Refreshed(report)) => {
                    summary.completed += 1;
                    summary.notifications_added += report.added;
                }
                Ok(TaskOutcome::Digested(report)) => {
                    summary.completed += 1;
                    summary.emails_sent += report.emails_sent;
                }
                Err(e) => {
                    summary.failures += 1;
                    let tried = attempts.entry(task.clone()).or_insert(0);
                    *tried += 1;
                    if *tried >= args.max_attempts {
                        error!(task = %task, attempts = *tried, error = %e, "task failed, dropping");
                        summary.dropped.push(task);
                    } else if let Err(requeue) = queue.enqueue(&ctx, task.clone()) {
                        warn!(task = %task, error = %requeue, "failed to re-enqueue task");
                        summary.dropped.push(task);
                    } else {
                        warn!(task = %task, attempt = *tried, error = %e, "task failed, retrying");
                    }
                }
            }
        }
    }

    info!(
        completed = summary.completed,
        failures = summary.failures,
        dropped = summary.dropped.len(),
        "task queue drained"
    );
    summary
}
