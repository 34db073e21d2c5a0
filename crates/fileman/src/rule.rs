//! Rule declarations and the rule error taxonomy

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Filesystem action a rule performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Copy the matched path to the rendered destination
    Copy,
    /// Rename the matched path to the rendered destination
    Move,
    /// Remove the matched path
    Delete,
}

impl Action {
    /// Lowercase verb for log lines
    pub fn verb(self) -> &'static str {
        match self {
            Action::Copy => "copy",
            Action::Move => "move",
            Action::Delete => "delete",
        }
    }
}

/// Why a rule's action was aborted
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("resulting destination path is empty")]
    EmptyDestination,

    #[error("destination '{0}' exists already")]
    DestinationExists(PathBuf),

    #[error("destination directory '{0}' does not exist")]
    MissingDestinationDir(PathBuf),

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sys(#[from] nix::Error),
}

/// One file-manipulation rule
///
/// Rules are immutable once constructed and evaluated in declaration
/// order; the first whose `src_re` matches an event path wins. For move
/// and copy, `dst_re` is a replacement template over `src_re`'s capture
/// groups (`$name` or `$1` syntax).
#[derive(Debug, Clone)]
pub struct Rule {
    /// What to do with a matched path
    pub action: Action,
    /// Pattern an event path must match
    pub src_re: Regex,
    /// Destination template (move/copy only)
    pub dst_re: String,
    /// Create missing destination ancestor directories
    pub auto_create: bool,
    /// Allow deleting non-empty directories
    pub rec: bool,
    /// Replace an existing destination instead of failing
    pub overwrite: bool,
    /// Mode applied to resulting files
    pub filemode: Option<u32>,
    /// Mode applied to resulting directories
    pub dirmode: Option<u32>,
    /// Owner applied to the result
    pub user: Option<String>,
    /// Group applied to the result
    pub group: Option<String>,
}

impl Rule {
    /// Create a rule with defaults: no auto-create, no overwrite,
    /// non-recursive delete, no mode or ownership changes
    pub fn new(action: Action, src_re: &str) -> anyhow::Result<Self> {
        Ok(Self {
            action,
            src_re: Regex::new(src_re)?,
            dst_re: String::new(),
            auto_create: false,
            rec: false,
            overwrite: false,
            filemode: None,
            dirmode: None,
            user: None,
            group: None,
        })
    }

    /// Set the destination template
    pub fn with_dst(mut self, dst_re: &str) -> Self {
        self.dst_re = dst_re.to_string();
        self
    }

    /// Create missing destination ancestors
    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    /// Allow recursive directory deletion
    pub fn with_rec(mut self, rec: bool) -> Self {
        self.rec = rec;
        self
    }

    /// Replace an existing destination
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Mode for resulting files
    pub fn with_filemode(mut self, mode: u32) -> Self {
        self.filemode = Some(mode);
        self
    }

    /// Mode for resulting directories
    pub fn with_dirmode(mut self, mode: u32) -> Self {
        self.dirmode = Some(mode);
        self
    }

    /// Owner of the result, by name
    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    /// Group of the result, by name
    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    /// Whether this rule applies to a path
    pub fn matches(&self, path: &str) -> bool {
        self.src_re.is_match(path)
    }

    /// Render the destination for a matched path
    pub fn render_dst(&self, path: &str) -> String {
        self.src_re.replace(path, self.dst_re.as_str()).into_owned()
    }
}
