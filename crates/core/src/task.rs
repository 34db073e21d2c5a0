//! The task abstraction executed by schedulers

use crate::Event;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Identifier generated per task execution, carried through logs
pub type TaskId = Uuid;

/// A unit of deferred work triggered by an event
///
/// Implementations must not assume exclusive access to the filesystem:
/// the triggering path may have changed between the event and the delayed
/// execution. Errors are logged by the owning scheduler and never retried.
#[async_trait]
pub trait Task: Send + Sync {
    /// Execute the task for `event` under the generated `task_id`
    async fn run(&self, event: Event, task_id: TaskId) -> Result<()>;
}
