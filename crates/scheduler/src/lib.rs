//! Delayed, cancellable task scheduling
//!
//! A [`TaskScheduler`] owns a table of pending tasks keyed by event path.
//! Scheduling an event starts (or restarts) a delayed task for its key;
//! a later cancel-mapped event for the same key stops the timer before it
//! fires. This is the debounce primitive: a burst of triggering events
//! collapses into the single task started by the last of them.

pub mod shell;

pub use shell::ShellTask;

use dashmap::DashMap;
use fsw_core::{Event, Handler, Task, TaskId};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Scheduling behavior knobs
#[derive(Debug, Clone)]
pub struct SchedulerOpts {
    /// React to file events
    pub files: bool,
    /// React to directory events
    pub dirs: bool,
    /// Delay before the task runs; zero runs immediately
    pub delay: Duration,
    /// Collapse all keys into one and reject events while a task runs
    pub single_job: bool,
}

impl Default for SchedulerOpts {
    fn default() -> Self {
        Self {
            files: true,
            dirs: false,
            delay: Duration::ZERO,
            single_job: false,
        }
    }
}

/// One scheduled (or already running) task
struct PendingTask {
    task_id: TaskId,
    /// True while the task sits in its delay window
    waiting: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Inner {
    name: String,
    task: Arc<dyn Task>,
    opts: SchedulerOpts,
    /// Invariant: at most one entry per key
    pending: DashMap<PathBuf, PendingTask>,
}

/// Generic delayed/cancellable task execution keyed by path
///
/// Cheap to clone; clones share the pending-task table. All mutation goes
/// through [`TaskScheduler::schedule`] and [`TaskScheduler::cancel`] plus
/// the shutdown surface ([`TaskScheduler::wait_idle`],
/// [`TaskScheduler::cancel_all`]).
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    /// Create a scheduler running `task` under the given options
    pub fn new(name: impl Into<String>, task: Arc<dyn Task>, opts: SchedulerOpts) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                task,
                opts,
                pending: DashMap::new(),
            }),
        }
    }

    /// Logical name for diagnostics
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of pending or running tasks
    pub fn pending_tasks(&self) -> usize {
        self.inner.pending.len()
    }

    /// The task key for an event: its pathname, or the fixed single-job key
    fn key_for(&self, event: &Event) -> PathBuf {
        if self.inner.opts.single_job {
            // Never collides with event paths, which are absolute
            PathBuf::from("*")
        } else {
            event.pathname.clone()
        }
    }

    /// Schedule (or reschedule) the task for this event's key
    ///
    /// An event whose file/directory kind is not enabled is ignored. An
    /// existing task still in its delay window is cancelled first — the
    /// delay restarts from now. Under single-job mode an event arriving
    /// while the task is already executing is rejected and logged.
    pub fn schedule(&self, event: &Event) {
        let enabled = if event.is_dir {
            self.inner.opts.dirs
        } else {
            self.inner.opts.files
        };
        if !enabled {
            return;
        }

        let key = self.key_for(event);

        // Debounce: a task still waiting out its delay is replaced
        if let Some((_, prev)) = self
            .inner
            .pending
            .remove_if(&key, |_, entry| entry.waiting.load(Ordering::Acquire))
        {
            prev.handle.abort();
            info!(
                scheduler = %self.inner.name,
                "received {event}, re-schedule task {} (delay={:?})",
                prev.task_id,
                self.inner.opts.delay
            );
        } else if self.inner.pending.contains_key(&key) {
            // The entry survived the waiting check, so the task is running
            if self.inner.opts.single_job {
                warn!(
                    scheduler = %self.inner.name,
                    "task in flight, ignoring {event}"
                );
                return;
            }
            if let Some((_, prev)) = self.inner.pending.remove(&key) {
                prev.handle.abort();
                debug!(
                    scheduler = %self.inner.name,
                    "superseding running task {} for {event}",
                    prev.task_id
                );
            }
        } else {
            info!(
                scheduler = %self.inner.name,
                "received {event}, schedule task (delay={:?})",
                self.inner.opts.delay
            );
        }

        let task_id = Uuid::new_v4();
        let waiting = Arc::new(AtomicBool::new(true));

        // The spawned task must not run before its table entry exists,
        // or its completion cleanup could race the insert below.
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(Self::run_scheduled(
            self.inner.clone(),
            event.clone(),
            key.clone(),
            task_id,
            waiting.clone(),
            gate_rx,
        ));

        self.inner.pending.insert(
            key,
            PendingTask {
                task_id,
                waiting,
                handle,
            },
        );
        let _ = gate_tx.send(());
    }

    /// Cancel a task still in its delay window for this event's key
    ///
    /// An absent key, or a task that already started executing, is a
    /// no-op; in-flight work is only force-cancelled at shutdown.
    pub fn cancel(&self, event: &Event) {
        let key = self.key_for(event);

        if let Some((_, prev)) = self
            .inner
            .pending
            .remove_if(&key, |_, entry| entry.waiting.load(Ordering::Acquire))
        {
            prev.handle.abort();
            info!(
                scheduler = %self.inner.name,
                "received {event}, cancel scheduled task {}",
                prev.task_id
            );
        } else {
            debug!(
                scheduler = %self.inner.name,
                "no pending task to cancel for {event}"
            );
        }
    }

    /// Resolve once every pending and running task has finished
    pub async fn wait_idle(&self) {
        while !self.inner.pending.is_empty() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Forcibly cancel everything still pending or running
    ///
    /// Aborting a running shell task kills its subprocess; an in-flight
    /// filesystem action completes its blocking section. Returns the
    /// number of cancelled tasks.
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<PathBuf> = self
            .inner
            .pending
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut cancelled = 0;
        for key in keys {
            if let Some((_, prev)) = self.inner.pending.remove(&key) {
                prev.handle.abort();
                warn!(
                    scheduler = %self.inner.name,
                    "forcibly cancelled task {} for '{}'",
                    prev.task_id,
                    key.display()
                );
                cancelled += 1;
            }
        }
        cancelled
    }

    async fn run_scheduled(
        inner: Arc<Inner>,
        event: Event,
        key: PathBuf,
        task_id: TaskId,
        waiting: Arc<AtomicBool>,
        gate: tokio::sync::oneshot::Receiver<()>,
    ) {
        let _ = gate.await;

        if !inner.opts.delay.is_zero() {
            tokio::time::sleep(inner.opts.delay).await;
        }
        waiting.store(false, Ordering::Release);

        info!(scheduler = %inner.name, "start task ({event}, task_id={task_id})");
        match inner.task.run(event.clone(), task_id).await {
            Ok(()) => {
                info!(scheduler = %inner.name, "task finished ({event}, task_id={task_id})")
            }
            Err(e) => {
                error!(scheduler = %inner.name, "task failed ({event}, task_id={task_id}): {e:#}")
            }
        }

        // Only clear the slot if it is still ours; a reschedule may have
        // replaced the entry while we were executing.
        inner
            .pending
            .remove_if(&key, |_, entry| entry.task_id == task_id);
    }
}

impl Handler for TaskScheduler {
    fn name(&self) -> &str {
        TaskScheduler::name(self)
    }

    fn schedule(&self, event: &Event) {
        TaskScheduler::schedule(self, event);
    }

    fn cancel(&self, event: &Event) {
        TaskScheduler::cancel(self, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use fsw_core::EventKind;
    use std::sync::atomic::AtomicUsize;

    /// Counts executions; optionally blocks to simulate long-running work
    struct CountingTask {
        runs: AtomicUsize,
        busy: Duration,
    }

    impl CountingTask {
        fn new() -> Arc<Self> {
            Self::busy_for(Duration::ZERO)
        }

        fn busy_for(busy: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                busy,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Task for CountingTask {
        async fn run(&self, _event: Event, _task_id: TaskId) -> Result<()> {
            if !self.busy.is_zero() {
                tokio::time::sleep(self.busy).await;
            }
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn file_event(path: &str) -> Event {
        Event::new(EventKind::CloseWrite, path, false)
    }

    #[tokio::test]
    async fn test_zero_delay_runs_once() {
        let task = CountingTask::new();
        let scheduler = TaskScheduler::new("t", task.clone(), SchedulerOpts::default());

        scheduler.schedule(&file_event("/tmp/a"));
        scheduler.wait_idle().await;

        assert_eq!(task.runs(), 1);
    }

    #[tokio::test]
    async fn test_cancel_within_delay_prevents_run() {
        let task = CountingTask::new();
        let scheduler = TaskScheduler::new(
            "t",
            task.clone(),
            SchedulerOpts {
                delay: Duration::from_millis(150),
                ..Default::default()
            },
        );

        scheduler.schedule(&file_event("/tmp/a"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.cancel(&file_event("/tmp/a"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(task.runs(), 0);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_reschedule_restarts_delay() {
        let task = CountingTask::new();
        let scheduler = TaskScheduler::new(
            "t",
            task.clone(),
            SchedulerOpts {
                delay: Duration::from_millis(200),
                ..Default::default()
            },
        );

        scheduler.schedule(&file_event("/tmp/a"));
        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.schedule(&file_event("/tmp/a"));

        // The first schedule would have fired by now; the reschedule
        // restarted the delay, so nothing has run yet.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(task.runs(), 0);

        scheduler.wait_idle().await;
        assert_eq!(task.runs(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let task = CountingTask::new();
        let scheduler = TaskScheduler::new(
            "t",
            task.clone(),
            SchedulerOpts {
                delay: Duration::from_millis(30),
                ..Default::default()
            },
        );

        scheduler.schedule(&file_event("/tmp/a"));
        scheduler.schedule(&file_event("/tmp/b"));
        scheduler.wait_idle().await;

        assert_eq!(task.runs(), 2);
    }

    #[tokio::test]
    async fn test_directory_events_ignored_by_default() {
        let task = CountingTask::new();
        let scheduler = TaskScheduler::new("t", task.clone(), SchedulerOpts::default());

        scheduler.schedule(&Event::new(EventKind::Create, "/tmp/dir", true));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(task.runs(), 0);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_single_job_rejects_while_running() {
        let task = CountingTask::busy_for(Duration::from_millis(200));
        let scheduler = TaskScheduler::new(
            "t",
            task.clone(),
            SchedulerOpts {
                single_job: true,
                ..Default::default()
            },
        );

        scheduler.schedule(&file_event("/tmp/a"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The task for /tmp/a is executing; a different key is rejected
        scheduler.schedule(&file_event("/tmp/b"));
        scheduler.wait_idle().await;

        assert_eq!(task.runs(), 1);
    }

    #[tokio::test]
    async fn test_single_job_collapses_waiting_keys() {
        let task = CountingTask::new();
        let scheduler = TaskScheduler::new(
            "t",
            task.clone(),
            SchedulerOpts {
                single_job: true,
                delay: Duration::from_millis(100),
                ..Default::default()
            },
        );

        scheduler.schedule(&file_event("/tmp/a"));
        scheduler.schedule(&file_event("/tmp/b"));
        assert_eq!(scheduler.pending_tasks(), 1);

        scheduler.wait_idle().await;
        assert_eq!(task.runs(), 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_key_is_noop() {
        let task = CountingTask::new();
        let scheduler = TaskScheduler::new("t", task, SchedulerOpts::default());

        scheduler.cancel(&file_event("/tmp/never-scheduled"));
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_aborts_pending_work() {
        let task = CountingTask::new();
        let scheduler = TaskScheduler::new(
            "t",
            task.clone(),
            SchedulerOpts {
                delay: Duration::from_secs(60),
                ..Default::default()
            },
        );

        scheduler.schedule(&file_event("/tmp/a"));
        scheduler.schedule(&file_event("/tmp/b"));
        assert_eq!(scheduler.pending_tasks(), 2);

        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(scheduler.pending_tasks(), 0);
        assert_eq!(task.runs(), 0);
    }
}
