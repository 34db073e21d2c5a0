//! Declarative TOML configuration
//!
//! The loader parses a config file into the entity set the daemon runs
//! on: named schedulers (shell or filemanager), watches with per-kind
//! handler entries, and daemon-wide settings. It performs construction
//! and validation only; any malformed input is a fatal startup error.
//!
//! ```toml
//! shutdown_timeout = 30
//!
//! [schedulers.cleanup]
//! kind = "filemanager"
//! delay = 10
//!
//! [[schedulers.cleanup.rules]]
//! action = "delete"
//! src_re = '.*\.tmp$'
//!
//! [[watches]]
//! path = "/tmp"
//! recursive = true
//! auto_add = true
//!
//! [watches.events]
//! close_write = [{ schedule = "cleanup" }]
//! delete = [{ cancel = "cleanup" }]
//! ```

use crate::daemon::Daemon;
use anyhow::{bail, Context, Result};
use fileman::{Action, FileManager, Rule};
use fsw_core::{EventKind, EventMap, HandlerRef};
use scheduler::{SchedulerOpts, ShellTask, TaskScheduler};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use watcher::{ExcludeFilter, Watch};

fn default_true() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Top-level configuration file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Seconds to wait for remaining tasks at shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Log level when `--debug` is not given (default: info)
    #[serde(default)]
    pub log_level: Option<String>,

    /// Hold an exclusive daemon lock at this path while running
    #[serde(default)]
    pub lock_file: Option<PathBuf>,

    /// Schedulers by name, referenced from watch handler entries
    #[serde(default)]
    pub schedulers: BTreeMap<String, SchedulerConfig>,

    /// Watched trees
    #[serde(default)]
    pub watches: Vec<WatchConfig>,
}

/// Scheduling knobs shared by every scheduler kind
#[derive(Debug, Deserialize)]
pub struct OptsConfig {
    /// React to file events (default: true)
    #[serde(default = "default_true")]
    pub files: bool,

    /// React to directory events (default: false)
    #[serde(default)]
    pub dirs: bool,

    /// Delay in seconds before the task runs (default: 0)
    #[serde(default)]
    pub delay: u64,

    /// Allow only one task in flight across all keys
    #[serde(default)]
    pub single_job: bool,
}

impl OptsConfig {
    fn to_opts(&self) -> SchedulerOpts {
        SchedulerOpts {
            files: self.files,
            dirs: self.dirs,
            delay: Duration::from_secs(self.delay),
            single_job: self.single_job,
        }
    }
}

/// One named scheduler
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SchedulerConfig {
    /// Run a templated command
    Shell {
        command: String,
        #[serde(flatten)]
        opts: OptsConfig,
    },
    /// Run the rule engine
    Filemanager {
        rules: Vec<RuleConfig>,
        #[serde(flatten)]
        opts: OptsConfig,
    },
}

/// One file-manipulation rule
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub action: Action,
    pub src_re: String,
    #[serde(default)]
    pub dst_re: String,
    #[serde(default)]
    pub auto_create: bool,
    #[serde(default)]
    pub rec: bool,
    #[serde(default)]
    pub overwrite: bool,
    pub filemode: Option<u32>,
    pub dirmode: Option<u32>,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl RuleConfig {
    fn build(&self) -> Result<Rule> {
        let mut rule = Rule::new(self.action, &self.src_re)
            .with_context(|| format!("rule pattern '{}'", self.src_re))?
            .with_dst(&self.dst_re)
            .with_auto_create(self.auto_create)
            .with_rec(self.rec)
            .with_overwrite(self.overwrite);
        if let Some(mode) = self.filemode {
            rule = rule.with_filemode(mode);
        }
        if let Some(mode) = self.dirmode {
            rule = rule.with_dirmode(mode);
        }
        if let Some(user) = &self.user {
            rule = rule.with_user(user);
        }
        if let Some(group) = &self.group {
            rule = rule.with_group(group);
        }
        Ok(rule)
    }
}

/// A handler entry within a watch's event table
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerEntry {
    /// Route to the named scheduler's schedule operation
    Schedule(String),
    /// Route to the named scheduler's cancel operation
    Cancel(String),
}

/// One watched tree
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub auto_add: bool,

    /// Exclude patterns, matched against absolute paths
    #[serde(default)]
    pub exclude: Vec<String>,

    /// File with one exclude pattern per line
    pub exclude_file: Option<PathBuf>,

    /// Handler entries per event kind; an empty list ignores the kind
    /// even when `default` is set
    #[serde(default)]
    pub events: BTreeMap<EventKind, Vec<HandlerEntry>>,

    /// Fallback handler entries for kinds with no explicit entry
    #[serde(default)]
    pub default: Vec<HandlerEntry>,
}

impl Config {
    /// Load and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))
    }

    /// Construct the daemon this configuration describes
    pub fn build(&self) -> Result<Daemon> {
        let mut schedulers: BTreeMap<String, TaskScheduler> = BTreeMap::new();
        for (name, sc) in &self.schedulers {
            let scheduler = match sc {
                SchedulerConfig::Shell { command, opts } => TaskScheduler::new(
                    name.clone(),
                    Arc::new(
                        ShellTask::new(command)
                            .with_context(|| format!("scheduler '{name}'"))?,
                    ),
                    opts.to_opts(),
                ),
                SchedulerConfig::Filemanager { rules, opts } => {
                    let rules = rules
                        .iter()
                        .map(RuleConfig::build)
                        .collect::<Result<Vec<_>>>()
                        .with_context(|| format!("scheduler '{name}'"))?;
                    TaskScheduler::new(
                        name.clone(),
                        Arc::new(FileManager::new(rules)),
                        opts.to_opts(),
                    )
                }
            };
            schedulers.insert(name.clone(), scheduler);
        }

        let mut daemon = Daemon::new(Duration::from_secs(self.shutdown_timeout))?;
        for scheduler in schedulers.values() {
            daemon.register_scheduler(scheduler.clone());
        }

        if self.watches.is_empty() {
            warn!("no watches configured, the daemon will not do anything");
        }

        for wc in &self.watches {
            let exclude = match (&wc.exclude_file, wc.exclude.is_empty()) {
                (Some(_), false) => {
                    bail!(
                        "watch '{}': exclude and exclude_file are mutually exclusive",
                        wc.path.display()
                    )
                }
                (Some(file), true) => ExcludeFilter::from_file(file)
                    .with_context(|| format!("watch '{}'", wc.path.display()))?,
                (None, false) => ExcludeFilter::new(&wc.exclude)
                    .with_context(|| format!("watch '{}'", wc.path.display()))?,
                (None, true) => ExcludeFilter::empty(),
            };

            let mut event_map = if wc.default.is_empty() {
                EventMap::new()
            } else {
                EventMap::with_default(resolve_handlers(&wc.default, &schedulers)?)
            };
            for (kind, entries) in &wc.events {
                let handlers = if entries.is_empty() {
                    None
                } else {
                    Some(resolve_handlers(entries, &schedulers)?)
                };
                event_map.set(*kind, handlers);
            }

            daemon.add_watch(
                Watch::new(&wc.path, event_map)
                    .with_recursive(wc.recursive)
                    .with_auto_add(wc.auto_add)
                    .with_exclude(exclude),
            );
        }

        Ok(daemon)
    }
}

/// Resolve handler entries against the named scheduler set
fn resolve_handlers(
    entries: &[HandlerEntry],
    schedulers: &BTreeMap<String, TaskScheduler>,
) -> Result<Vec<HandlerRef>> {
    entries
        .iter()
        .map(|entry| {
            let (name, cancel) = match entry {
                HandlerEntry::Schedule(name) => (name, false),
                HandlerEntry::Cancel(name) => (name, true),
            };
            let scheduler = schedulers
                .get(name)
                .with_context(|| format!("unknown scheduler '{name}'"))?;
            Ok(if cancel {
                HandlerRef::Cancel(Arc::new(scheduler.clone()))
            } else {
                HandlerRef::Invoke(Arc::new(scheduler.clone()))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(contents: &str) -> Result<Config> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        Config::load(file.path())
    }

    const FULL: &str = r#"
shutdown_timeout = 5

[schedulers.cleanup]
kind = "filemanager"
delay = 10

[[schedulers.cleanup.rules]]
action = "delete"
src_re = '.*\.tmp$'

[schedulers.notify]
kind = "shell"
command = "/usr/local/bin/task.sh {maskname} {pathname} {src_pathname}"

[[watches]]
path = "/tmp"
auto_add = true
exclude = ['^/tmp/skip$']

[watches.events]
close_write = [{ schedule = "cleanup" }, { schedule = "notify" }]
modify = [{ cancel = "cleanup" }]
delete = []
"#;

    #[test]
    fn test_full_config_builds() {
        let config = parse(FULL).unwrap();
        assert_eq!(config.shutdown_timeout, 5);
        assert_eq!(config.schedulers.len(), 2);
        assert_eq!(config.watches.len(), 1);

        let daemon = config.build().unwrap();
        assert_eq!(daemon.scheduler_count(), 2);
    }

    #[test]
    fn test_unknown_scheduler_reference_fails() {
        let config = parse(
            r#"
[[watches]]
path = "/tmp"

[watches.events]
close_write = [{ schedule = "nope" }]
"#,
        )
        .unwrap();

        let err = config.build().unwrap_err();
        assert!(format!("{err:#}").contains("unknown scheduler 'nope'"));
    }

    #[test]
    fn test_invalid_rule_pattern_fails() {
        let config = parse(
            r#"
[schedulers.bad]
kind = "filemanager"

[[schedulers.bad.rules]]
action = "delete"
src_re = '([unclosed'
"#,
        )
        .unwrap();

        assert!(config.build().is_err());
    }

    #[test]
    fn test_unknown_event_kind_is_rejected() {
        assert!(parse(
            r#"
[[watches]]
path = "/tmp"

[watches.events]
not_an_event = []
"#,
        )
        .is_err());
    }

    #[test]
    fn test_unknown_top_level_key_is_rejected() {
        assert!(parse("no_such_setting = 1\n").is_err());
    }

    #[test]
    fn test_exclude_and_exclude_file_are_exclusive() {
        let config = parse(
            r#"
[[watches]]
path = "/tmp"
exclude = ['^/tmp/a$']
exclude_file = "/etc/fswatchd/exclude"
"#,
        )
        .unwrap();

        let err = config.build().unwrap_err();
        assert!(format!("{err:#}").contains("mutually exclusive"));
    }

    #[test]
    fn test_octal_modes_parse() {
        let config = parse(
            r#"
[schedulers.mover]
kind = "filemanager"

[[schedulers.mover.rules]]
action = "move"
src_re = '^(?P<p>.*)\.part$'
dst_re = '$p'
auto_create = true
filemode = 0o644
dirmode = 0o755
"#,
        )
        .unwrap();

        match &config.schedulers["mover"] {
            SchedulerConfig::Filemanager { rules, .. } => {
                assert_eq!(rules[0].filemode, Some(0o644));
                assert_eq!(rules[0].dirmode, Some(0o755));
            }
            _ => panic!("expected filemanager"),
        }
        config.build().unwrap();
    }
}
