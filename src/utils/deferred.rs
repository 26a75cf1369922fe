//! Deferred task queue.
//!
//! Retries a unit of work once per poll until it reports success or its
//! deadline passes. There is no backoff: the retry cadence is the poll
//! cadence. A task that returns an error is abandoned on the spot.
//!
//! ```rust
//! use peerlink::utils::deferred::{DeferredTaskQueue, FnTask, TaskStatus};
//! use std::time::Duration;
//!
//! let mut queue = DeferredTaskQueue::new(16);
//! let mut attempts = 0;
//! let status = queue
//!     .add(Box::new(FnTask::new("count to three", Duration::from_secs(5), move || {
//!         attempts += 1;
//!         Ok(attempts == 3)
//!     })))
//!     .unwrap();
//! assert_eq!(status, TaskStatus::Retained);
//!
//! queue.poll();
//! let report = queue.poll();
//! assert_eq!(report.completed, 1);
//! assert!(queue.is_empty());
//! ```

use crate::config::TaskConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::Metrics;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// A retry-until-timeout unit of work.
pub trait DeferredTask: Send {
    /// Deadline after which a still-unfinished task is abandoned.
    fn expiry(&self) -> Instant;

    /// One attempt. `Ok(false)` means "not yet possible, try again".
    fn run(&mut self) -> Result<bool>;

    /// Diagnostic text logged when the task is given up.
    fn on_abandon(&mut self) -> String;
}

/// A deferred task built from a closure.
pub struct FnTask<F> {
    label: String,
    expiry: Instant,
    run: F,
}

impl<F> FnTask<F>
where
    F: FnMut() -> Result<bool> + Send,
{
    pub fn new(label: impl Into<String>, timeout: Duration, run: F) -> Self {
        Self::with_expiry(label, Instant::now() + timeout, run)
    }

    pub fn with_expiry(label: impl Into<String>, expiry: Instant, run: F) -> Self {
        Self {
            label: label.into(),
            expiry,
            run,
        }
    }
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask")
            .field("label", &self.label)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl<F> DeferredTask for FnTask<F>
where
    F: FnMut() -> Result<bool> + Send,
{
    fn expiry(&self) -> Instant {
        self.expiry
    }

    fn run(&mut self) -> Result<bool> {
        (self.run)()
    }

    fn on_abandon(&mut self) -> String {
        self.label.clone()
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Retained,
    Expired,
    Failed,
}

/// Tally of one poll round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub completed: usize,
    pub retained: usize,
    pub expired: usize,
    pub failed: usize,
}

impl PollReport {
    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Retained => self.retained += 1,
            TaskStatus::Expired => self.expired += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }
}

pub struct DeferredTaskQueue {
    tasks: Vec<Box<dyn DeferredTask>>,
    // Drained each round and swapped with `tasks`.
    spare: Vec<Box<dyn DeferredTask>>,
    max_tasks: usize,
    default_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl fmt::Debug for DeferredTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredTaskQueue")
            .field("tasks", &self.tasks.len())
            .field("max_tasks", &self.max_tasks)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl DeferredTaskQueue {
    pub fn new(max_tasks: usize) -> Self {
        Self {
            tasks: Vec::new(),
            spare: Vec::new(),
            max_tasks,
            default_timeout: crate::config::DEFAULT_TASK_TIMEOUT,
            metrics: None,
        }
    }

    pub fn from_config(config: &TaskConfig) -> Self {
        let mut queue = Self::new(config.max_tasks);
        queue.default_timeout = config.default_timeout;
        queue
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Retry window used by [`add_fn`](Self::add_fn).
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Attempts the task right away and keeps it only if it must be retried.
    pub fn add(&mut self, task: Box<dyn DeferredTask>) -> Result<TaskStatus> {
        self.add_at(task, Instant::now())
    }

    pub fn add_at(&mut self, mut task: Box<dyn DeferredTask>, now: Instant) -> Result<TaskStatus> {
        let status = self.attempt(task.as_mut(), now);
        if status != TaskStatus::Retained {
            return Ok(status);
        }

        if self.tasks.len() >= self.max_tasks {
            let label = task.on_abandon();
            warn!(task = %label, max_tasks = self.max_tasks, "Deferred task rejected, queue full");
            return Err(ProtocolError::TaskFailed(format!(
                "{}: {label}",
                constants::ERR_QUEUE_FULL
            )));
        }

        self.tasks.push(task);
        Ok(status)
    }

    /// Queues a closure with the default timeout.
    pub fn add_fn<F>(&mut self, label: impl Into<String>, run: F) -> Result<TaskStatus>
    where
        F: FnMut() -> Result<bool> + Send + 'static,
    {
        let task = FnTask::new(label, self.default_timeout, run);
        self.add(Box::new(task))
    }

    pub fn poll(&mut self) -> PollReport {
        self.poll_at(Instant::now())
    }

    /// Gives every queued task exactly one attempt.
    pub fn poll_at(&mut self, now: Instant) -> PollReport {
        let mut report = PollReport::default();
        if self.tasks.is_empty() {
            return report;
        }

        std::mem::swap(&mut self.tasks, &mut self.spare);
        let mut round = std::mem::take(&mut self.spare);
        for mut task in round.drain(..) {
            let status = self.attempt(task.as_mut(), now);
            report.record(status);
            if status == TaskStatus::Retained {
                self.tasks.push(task);
            }
        }
        self.spare = round;

        if report.completed + report.expired + report.failed > 0 {
            debug!(
                completed = report.completed,
                retained = report.retained,
                expired = report.expired,
                failed = report.failed,
                "Deferred tasks polled"
            );
        }
        report
    }

    /// A task past its deadline is abandoned without running.
    fn attempt(&self, task: &mut dyn DeferredTask, now: Instant) -> TaskStatus {
        if now >= task.expiry() {
            warn!("Expired: {}", task.on_abandon());
            if let Some(metrics) = &self.metrics {
                metrics.task_expired();
            }
            return TaskStatus::Expired;
        }

        match task.run() {
            Ok(true) => {
                if let Some(metrics) = &self.metrics {
                    metrics.task_completed();
                }
                TaskStatus::Completed
            }
            Ok(false) => TaskStatus::Retained,
            Err(e) => {
                error!(error = %e, task = %task.on_abandon(), "Deferred task failed");
                if let Some(metrics) = &self.metrics {
                    metrics.task_failed();
                }
                TaskStatus::Failed
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drops every queued task without running or abandoning it.
    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}
