//! Bounded worker pool for extraction tasks

use futures::future::join_all;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::error::Result;
use crate::metrics::PipelineMetrics;

/// Why a task produced no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The work function returned an error
    Failed(String),
    /// The task exceeded its time budget
    TimedOut(Duration),
    /// The work function panicked
    Panicked(String),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Failed(msg) => write!(f, "{}", msg),
            TaskError::TimedOut(limit) => {
                write!(f, "timed out after {:.1}s", limit.as_secs_f64())
            }
            TaskError::Panicked(msg) => write!(f, "worker panicked: {}", msg),
        }
    }
}

/// Per-task outcome, one per submitted input
pub type TaskOutcome<T> = std::result::Result<T, TaskError>;

/// Long-lived worker pool shared by every batch.
///
/// At most `workers` tasks run at once across all callers. Work runs on the
/// blocking thread pool; a task that outlives its timeout is reported as
/// timed out right away, but the thread cannot be interrupted and keeps its
/// slot until it actually returns.
pub struct ParallelRunner {
    permits: Arc<Semaphore>,
    workers: usize,
    task_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl ParallelRunner {
    pub fn new(workers: usize, task_timeout: Duration, metrics: Arc<PipelineMetrics>) -> Self {
        let workers = workers.max(1);
        tracing::info!(
            "Worker pool configured: {} workers, {}s per-task timeout",
            workers,
            task_timeout.as_secs_f64()
        );

        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            task_timeout,
            metrics,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Run extraction units, recording unit counters.
    ///
    /// Returns one outcome per input in submission order regardless of
    /// completion order. Failures, timeouts and panics are captured per task.
    pub async fn run<I, T, F>(&self, inputs: Vec<I>, work: F) -> Vec<TaskOutcome<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Result<T> + Send + Sync + 'static,
    {
        self.execute(inputs, work, true).await
    }

    /// Same scheduling as [`run`](Self::run) for preparatory work that should
    /// not show up in the unit counters.
    pub async fn run_untracked<I, T, F>(&self, inputs: Vec<I>, work: F) -> Vec<TaskOutcome<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Result<T> + Send + Sync + 'static,
    {
        self.execute(inputs, work, false).await
    }

    async fn execute<I, T, F>(&self, inputs: Vec<I>, work: F, track: bool) -> Vec<TaskOutcome<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Result<T> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let task_timeout = self.task_timeout;

        let tasks = inputs.into_iter().enumerate().map(|(idx, input)| {
            let work = Arc::clone(&work);
            let permits = Arc::clone(&self.permits);
            let metrics = Arc::clone(&self.metrics);

            async move {
                let permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Err(TaskError::Failed("worker pool is closed".to_string())),
                };
                let in_flight = track.then(|| metrics.enter());
                let start = Instant::now();

                // The slot belongs to the thread, not to the wait below
                let handle = tokio::task::spawn_blocking(move || {
                    let _slot = (permit, in_flight);
                    work(input)
                });
                let outcome = match timeout(task_timeout, handle).await {
                    Ok(Ok(Ok(value))) => Ok(value),
                    Ok(Ok(Err(e))) => Err(TaskError::Failed(e.to_string())),
                    Ok(Err(join_err)) if join_err.is_panic() => {
                        Err(TaskError::Panicked(panic_message(join_err.into_panic())))
                    }
                    Ok(Err(join_err)) => Err(TaskError::Failed(join_err.to_string())),
                    Err(_) => {
                        tracing::error!(
                            "TIMEOUT task {} after {:.1}s (limit: {}s)",
                            idx,
                            start.elapsed().as_secs_f64(),
                            task_timeout.as_secs_f64()
                        );
                        Err(TaskError::TimedOut(task_timeout))
                    }
                };

                if track {
                    match &outcome {
                        Ok(_) => metrics.record_unit_success(),
                        Err(TaskError::TimedOut(_)) => metrics.record_unit_timeout(),
                        Err(e) => {
                            tracing::warn!("Task {} failed: {}", idx, e);
                            metrics.record_unit_failure();
                        }
                    }
                }

                outcome
            }
        });

        join_all(tasks).await
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runner(workers: usize, timeout: Duration) -> (ParallelRunner, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        (ParallelRunner::new(workers, timeout, Arc::clone(&metrics)), metrics)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_follow_input_order() {
        let (runner, _) = runner(4, Duration::from_secs(5));
        // Earlier inputs sleep longer, so they complete last
        let inputs: Vec<u64> = (0..8).collect();
        let outcomes = runner
            .run(inputs, |n| {
                std::thread::sleep(Duration::from_millis(80 - n * 10));
                Ok(n * 2)
            })
            .await;

        let values: Vec<u64> = outcomes.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(values, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_bound_respected() {
        let (runner, metrics) = runner(2, Duration::from_secs(5));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (c, p) = (Arc::clone(&current), Arc::clone(&peak));
        let outcomes = runner
            .run((0..10).collect::<Vec<u32>>(), move |_| {
                let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                c.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(metrics.snapshot().peak_in_flight <= 2);
        assert_eq!(metrics.snapshot().units_succeeded, 10);
        assert_eq!(metrics.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_is_isolated() {
        let (runner, metrics) = runner(3, Duration::from_millis(100));
        let outcomes = runner
            .run(vec![10u64, 400, 10], |ms| {
                std::thread::sleep(Duration::from_millis(ms));
                Ok(ms)
            })
            .await;

        assert_eq!(outcomes[0], Ok(10));
        assert_eq!(outcomes[1], Err(TaskError::TimedOut(Duration::from_millis(100))));
        assert_eq!(outcomes[2], Ok(10));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.units_timed_out, 1);
        assert_eq!(snapshot.units_failed, 1);
        assert_eq!(snapshot.units_succeeded, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_work_keeps_its_slot() {
        let (runner, metrics) = runner(1, Duration::from_millis(50));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (c, p) = (Arc::clone(&current), Arc::clone(&peak));
        let outcomes = runner
            .run((0..4).collect::<Vec<u32>>(), move |_| {
                let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(150));
                c.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        // Every task times out; the next one starts only once the previous thread returns
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes
            .iter()
            .all(|o| *o == Err(TaskError::TimedOut(Duration::from_millis(50)))));
        assert_eq!(metrics.snapshot().units_timed_out, 4);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_captured() {
        let (runner, metrics) = runner(2, Duration::from_secs(5));
        let outcomes = runner
            .run(vec![1u32, 2, 3, 4], |n| match n {
                2 => Err(Error::pdf_parse("doc2.pdf", "bad xref")),
                3 => panic!("renderer exploded"),
                _ => Ok(n),
            })
            .await;

        assert_eq!(outcomes[0], Ok(1));
        assert!(matches!(&outcomes[1], Err(TaskError::Failed(msg)) if msg.contains("bad xref")));
        assert_eq!(
            outcomes[2],
            Err(TaskError::Panicked("renderer exploded".to_string()))
        );
        assert_eq!(outcomes[3], Ok(4));
        assert_eq!(metrics.snapshot().units_failed, 2);
    }

    #[tokio::test]
    async fn test_untracked_runs_skip_unit_counters() {
        let (runner, metrics) = runner(2, Duration::from_secs(5));
        let outcomes = runner.run_untracked(vec![1u8, 2], Ok).await;
        assert_eq!(outcomes, vec![Ok(1), Ok(2)]);
        assert_eq!(metrics.snapshot().units_attempted, 0);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let (runner, _) = runner(2, Duration::from_secs(1));
        let outcomes: Vec<TaskOutcome<()>> = runner.run(Vec::<u8>::new(), |_| Ok(())).await;
        assert!(outcomes.is_empty());
    }
}
