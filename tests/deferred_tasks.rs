//! Integration tests for the deferred task queue

#![allow(clippy::expect_used, clippy::unwrap_used)]

use peerlink::config::TaskConfig;
use peerlink::error::ProtocolError;
use peerlink::utils::deferred::{DeferredTask, DeferredTaskQueue, FnTask, PollReport, TaskStatus};
use peerlink::utils::metrics::Metrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Never succeeds; counts attempts and abandonments.
struct Stubborn {
    expiry: Instant,
    runs: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
}

impl DeferredTask for Stubborn {
    fn expiry(&self) -> Instant {
        self.expiry
    }

    fn run(&mut self) -> peerlink::Result<bool> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    fn on_abandon(&mut self) -> String {
        self.abandoned.fetch_add(1, Ordering::SeqCst);
        "stubborn".to_string()
    }
}

#[test]
fn test_retried_until_expiry_then_abandoned_once() {
    let start = Instant::now();
    let runs = Arc::new(AtomicUsize::new(0));
    let abandoned = Arc::new(AtomicUsize::new(0));
    let mut queue = DeferredTaskQueue::new(8);

    let task = Stubborn {
        expiry: start + Duration::from_millis(100),
        runs: runs.clone(),
        abandoned: abandoned.clone(),
    };
    assert_eq!(queue.add_at(Box::new(task), start).unwrap(), TaskStatus::Retained);

    for step in 1..=4 {
        let report = queue.poll_at(start + Duration::from_millis(step * 20));
        assert_eq!(report.retained, 1);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 5);
    assert_eq!(abandoned.load(Ordering::SeqCst), 0);

    let report = queue.poll_at(start + Duration::from_millis(100));
    assert_eq!(report.expired, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 5);
    assert_eq!(abandoned.load(Ordering::SeqCst), 1);
    assert!(queue.is_empty());

    assert_eq!(queue.poll_at(start + Duration::from_secs(10)), PollReport::default());
    assert_eq!(runs.load(Ordering::SeqCst), 5);
    assert_eq!(abandoned.load(Ordering::SeqCst), 1);
}

#[test]
fn test_success_on_later_poll() {
    let ready = Arc::new(AtomicUsize::new(0));
    let flag = ready.clone();
    let mut queue = DeferredTaskQueue::new(8);
    queue
        .add_fn("wait for flag", move || Ok(flag.load(Ordering::SeqCst) > 0))
        .unwrap();

    assert_eq!(queue.poll().retained, 1);
    ready.store(1, Ordering::SeqCst);
    let report = queue.poll();
    assert_eq!(report.completed, 1);
    assert!(queue.is_empty());
}

#[test]
fn test_already_expired_task_never_runs() {
    let now = Instant::now();
    let runs = Arc::new(AtomicUsize::new(0));
    let abandoned = Arc::new(AtomicUsize::new(0));
    let mut queue = DeferredTaskQueue::new(8);

    let task = Stubborn {
        expiry: now,
        runs: runs.clone(),
        abandoned: abandoned.clone(),
    };
    assert_eq!(queue.add_at(Box::new(task), now).unwrap(), TaskStatus::Expired);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(abandoned.load(Ordering::SeqCst), 1);
    assert!(queue.is_empty());
}

#[test]
fn test_body_does_not_run_past_deadline() {
    let start = Instant::now();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let mut queue = DeferredTaskQueue::new(8);

    let task = FnTask::with_expiry("late success", start + Duration::from_millis(10), move || {
        Ok(counter.fetch_add(1, Ordering::SeqCst) > 0)
    });
    assert_eq!(queue.add_at(Box::new(task), start).unwrap(), TaskStatus::Retained);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // The second run would succeed, but the deadline has passed.
    let report = queue.poll_at(start + Duration::from_secs(60));
    assert_eq!(report.expired, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(queue.is_empty());
}

#[test]
fn test_tasks_keep_their_order() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut queue = DeferredTaskQueue::new(8);
    let start = Instant::now();

    for name in ["first", "second", "third"] {
        let log = order.clone();
        let mut tries = 0;
        let task = FnTask::with_expiry(name, start + Duration::from_secs(1), move || {
            log.lock().unwrap().push(name);
            tries += 1;
            Ok(tries == 3)
        });
        queue.add_at(Box::new(task), start).unwrap();
    }

    queue.poll_at(start);
    let report = queue.poll_at(start);
    assert_eq!(report.completed, 3);
    assert_eq!(
        *order.lock().unwrap(),
        ["first", "second", "third"].repeat(3)
    );
}

#[test]
fn test_queue_limit() {
    let mut queue = DeferredTaskQueue::from_config(&TaskConfig {
        max_tasks: 2,
        ..TaskConfig::default()
    });
    queue.add_fn("one", || Ok(false)).unwrap();
    queue.add_fn("two", || Ok(false)).unwrap();

    let err = queue.add_fn("three", || Ok(false)).unwrap_err();
    assert!(matches!(err, ProtocolError::TaskFailed(ref m) if m.contains("three")));
    assert_eq!(queue.len(), 2);

    // A task that finishes on its first attempt never needs a slot.
    assert_eq!(queue.add_fn("instant", || Ok(true)).unwrap(), TaskStatus::Completed);
}

#[test]
fn test_metrics_track_outcomes() {
    let metrics = Arc::new(Metrics::new());
    let mut queue = DeferredTaskQueue::new(8).with_metrics(metrics.clone());
    let now = Instant::now();

    queue.add_fn("done", || Ok(true)).unwrap();
    queue
        .add_fn("broken", || Err(ProtocolError::Custom("no route".into())))
        .unwrap();
    queue
        .add_at(
            Box::new(FnTask::with_expiry("late", now + Duration::from_millis(5), || Ok(false))),
            now,
        )
        .unwrap();
    queue.poll_at(now + Duration::from_millis(5));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.tasks_completed, 1);
    assert_eq!(snapshot.tasks_failed, 1);
    assert_eq!(snapshot.tasks_expired, 1);
}
