//! Command execution task
//!
//! A [`ShellTask`] turns a command template into an argument list at
//! construction time and substitutes `{maskname}`, `{pathname}` and
//! `{src_pathname}` per argument when it runs. The child's exit status is
//! the sole success signal; output is not parsed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use fsw_core::{Event, Task, TaskId};
use tokio::process::Command;
use tracing::info;

/// Runs a templated command as a child process
pub struct ShellTask {
    argv: Vec<String>,
}

impl ShellTask {
    /// Split a command template into its argument list
    ///
    /// The template is split on whitespace once; there is no shell
    /// interpretation, so placeholders expanding to paths with spaces
    /// stay single arguments.
    pub fn new(template: &str) -> Result<Self> {
        let argv: Vec<String> = template.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            bail!("command template is empty");
        }
        Ok(Self { argv })
    }

    /// The argument list with placeholders substituted for `event`
    ///
    /// A missing move source substitutes the empty string.
    pub fn render(&self, event: &Event) -> Vec<String> {
        let pathname = event.pathname_lossy();
        let src_pathname = event
            .src_pathname
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{maskname}", event.maskname())
                    .replace("{pathname}", &pathname)
                    .replace("{src_pathname}", &src_pathname)
            })
            .collect()
    }
}

#[async_trait]
impl Task for ShellTask {
    async fn run(&self, event: Event, task_id: TaskId) -> Result<()> {
        let argv = self.render(&event);
        info!("{task_id}: execute command: {}", argv.join(" "));

        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("failed to spawn '{}'", argv[0]))?;

        if !status.success() {
            bail!("command exited with {status}");
        }
        Ok(())
    }
}
