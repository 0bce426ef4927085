//! Bounded task groups for the dealership and vehicle fan-out
//!
//! A [`TaskGroup`] runs at most `width` tasks at once, optionally bounds each task with a
//! timeout, and stops every task when its cancellation token fires. Results come back in
//! completion order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The task exceeded the group's per-task timeout and was dropped
    TimedOut,
    /// The group was cancelled before the task finished
    Cancelled,
    Panicked(String),
}

impl<T> TaskOutcome<T> {
    pub fn into_completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Outcomes of every task in a group, in completion order
#[derive(Debug)]
pub struct GroupReport<T> {
    pub outcomes: Vec<TaskOutcome<T>>,
}

impl<T> GroupReport<T> {
    pub fn completed(self) -> Vec<T> {
        self.outcomes
            .into_iter()
            .filter_map(TaskOutcome::into_completed)
            .collect()
    }

    pub fn timed_out(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::TimedOut))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Cancelled))
    }

    pub fn panicked(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Panicked(_)))
    }

    fn count(&self, predicate: impl Fn(&TaskOutcome<T>) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(o)).count()
    }
}

pub struct TaskGroup<T> {
    label: &'static str,
    semaphore: Arc<Semaphore>,
    task_timeout: Option<Duration>,
    cancel: CancellationToken,
    tasks: JoinSet<TaskOutcome<T>>,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new(label: &'static str, width: usize, cancel: CancellationToken) -> Self {
        Self {
            label,
            semaphore: Arc::new(Semaphore::new(width.max(1))),
            task_timeout: None,
            cancel,
            tasks: JoinSet::new(),
        }
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Queues `task`; it starts once a slot in the group is free.
    ///
    /// The timeout clock starts when the task starts running, not when it is queued.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let cancel = self.cancel.clone();
        let task_timeout = self.task_timeout;

        self.tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return TaskOutcome::Cancelled,
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return TaskOutcome::Cancelled,
                },
            };

            let run = async move {
                match task_timeout {
                    Some(limit) => tokio::time::timeout(limit, task).await.ok(),
                    None => Some(task.await),
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => TaskOutcome::Cancelled,
                result = run => match result {
                    Some(value) => TaskOutcome::Completed(value),
                    None => TaskOutcome::TimedOut,
                },
            }
        });
    }

    /// Waits for every queued task.
    pub async fn join(self) -> GroupReport<T> {
        self.join_with(|_| {}).await
    }

    /// Waits for every queued task, calling `on_outcome` as each one finishes.
    pub async fn join_with(mut self, mut on_outcome: impl FnMut(&TaskOutcome<T>)) -> GroupReport<T> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());

        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => self.outcome_of_join_error(e),
            };

            match &outcome {
                TaskOutcome::TimedOut => warn!(group = self.label, "Task timed out"),
                TaskOutcome::Cancelled => debug!(group = self.label, "Task cancelled"),
                _ => {}
            }

            on_outcome(&outcome);
            outcomes.push(outcome);
        }

        GroupReport { outcomes }
    }

    fn outcome_of_join_error(&self, error: JoinError) -> TaskOutcome<T> {
        if !error.is_panic() {
            return TaskOutcome::Cancelled;
        }
        let payload = error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(group = self.label, "Task panicked: {}", message);
        TaskOutcome::Panicked(message)
    }
}

/// Running tally of finished tasks
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_completion(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            completed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        ProgressInfo {
            total: self.total,
            completed,
            errors,
            success: completed.saturating_sub(errors),
            elapsed,
            rate,
            eta: (rate > 0.0).then(|| {
                let remaining = self.total.saturating_sub(completed);
                Duration::from_secs_f64(remaining as f64 / rate)
            }),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.total
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
    pub rate: f64,
    pub eta: Option<Duration>,
}
