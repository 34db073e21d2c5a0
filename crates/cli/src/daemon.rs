//! Daemon orchestration
//!
//! A [`Daemon`] owns the watch manager, the registered schedulers, and
//! the shutdown protocol: stop accepting notifications, wait up to the
//! configured timeout for pending work, then force-cancel whatever is
//! left. Exit is always clean regardless of outstanding tasks.

use anyhow::Result;
use futures::StreamExt;
use scheduler::TaskScheduler;
use std::future::Future;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use watcher::{Watch, WatchId, WatchManager};

pub struct Daemon {
    manager: WatchManager,
    schedulers: Vec<TaskScheduler>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("watch_count", &self.manager.watch_count())
            .field("scheduler_count", &self.schedulers.len())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl Daemon {
    pub fn new(shutdown_timeout: Duration) -> Result<Self> {
        Ok(Self {
            manager: WatchManager::new()?,
            schedulers: Vec::new(),
            shutdown_timeout,
        })
    }

    /// Register a scheduler for shutdown draining
    pub fn register_scheduler(&mut self, scheduler: TaskScheduler) {
        self.schedulers.push(scheduler);
    }

    /// Register a watch declaration
    pub fn add_watch(&mut self, watch: Watch) -> WatchId {
        self.manager.add_watch(watch)
    }

    /// Number of live kernel watches
    pub fn watch_count(&self) -> usize {
        self.manager.watch_count()
    }

    /// Number of registered schedulers
    pub fn scheduler_count(&self) -> usize {
        self.schedulers.len()
    }

    /// Pending or running tasks across all schedulers
    pub fn pending_task_count(&self) -> usize {
        self.schedulers.iter().map(TaskScheduler::pending_tasks).sum()
    }

    /// Run until SIGINT or SIGTERM, then shut down gracefully
    pub async fn run(&mut self) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let shutdown = async move {
            tokio::select! {
                _ = sigint.recv() => info!("got SIGINT, shutdown"),
                _ = sigterm.recv() => info!("got SIGTERM, shutdown"),
            }
        };
        self.run_until(shutdown).await
    }

    /// Run until the given future resolves, then shut down gracefully
    ///
    /// The signal-driven [`Daemon::run`] is a thin wrapper over this;
    /// embedders and tests supply their own shutdown condition.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut stream = self.manager.event_stream()?;
        info!("daemon started ({} kernel watches)", self.manager.watch_count());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                maybe = stream.next() => match maybe {
                    Some(Ok(raw)) => self.manager.process_raw(raw),
                    Some(Err(e)) => error!("notification stream error: {e}"),
                    None => break,
                },
                _ = &mut shutdown => break,
            }
        }

        // Stop accepting notifications before draining
        drop(stream);
        self.shutdown().await;
        Ok(())
    }

    /// Drain pending work within the shutdown timeout, then force-cancel
    pub async fn shutdown(&mut self) {
        self.manager.stop();

        let pending = self.pending_task_count();
        if pending > 0 {
            info!(
                "waiting up to {:?} for {pending} remaining task(s) to complete",
                self.shutdown_timeout
            );
            let drain = async {
                for scheduler in &self.schedulers {
                    scheduler.wait_idle().await;
                }
            };
            if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
                warn!("shutdown timeout exceeded, cancelling remaining task(s)");
                for scheduler in &self.schedulers {
                    scheduler.cancel_all();
                }
            }
        }

        info!("shutdown complete");
    }
}
