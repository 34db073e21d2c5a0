//! Normalized filesystem events
//!
//! The watch manager translates raw kernel notifications into [`Event`]
//! values; everything downstream (routers, schedulers, the rule engine)
//! only ever sees this type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of filesystem event
///
/// One variant per kernel-symbolic event type. The serde names
/// (`close_write`, `moved_from`, ...) are the configuration surface;
/// [`EventKind::maskname`] yields the kernel-style name used in command
/// templates and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// File was accessed (read)
    Access,
    /// Metadata changed (permissions, ownership, timestamps)
    Attrib,
    /// File opened read-only was closed
    CloseNowrite,
    /// File opened for writing was closed
    CloseWrite,
    /// File or directory created in a watched directory
    Create,
    /// File or directory deleted from a watched directory
    Delete,
    /// The watched item itself was deleted
    DeleteSelf,
    /// The kernel removed the watch (directory deleted or unmounted)
    Ignored,
    /// File content was modified
    Modify,
    /// The watched item itself was moved
    MoveSelf,
    /// File or directory moved out of a watched directory
    MovedFrom,
    /// File or directory moved into a watched directory
    MovedTo,
    /// File or directory was opened
    Open,
    /// The kernel event queue overflowed; events were lost
    QueueOverflow,
    /// The filesystem backing the watched item was unmounted
    Unmount,
}

impl EventKind {
    /// Every supported event kind, in kernel flag order
    pub const ALL: [EventKind; 15] = [
        EventKind::Access,
        EventKind::Attrib,
        EventKind::CloseNowrite,
        EventKind::CloseWrite,
        EventKind::Create,
        EventKind::Delete,
        EventKind::DeleteSelf,
        EventKind::Ignored,
        EventKind::Modify,
        EventKind::MoveSelf,
        EventKind::MovedFrom,
        EventKind::MovedTo,
        EventKind::Open,
        EventKind::QueueOverflow,
        EventKind::Unmount,
    ];

    /// Kernel-style symbolic name (`IN_CLOSE_WRITE`, `IN_MOVED_TO`, ...)
    pub fn maskname(self) -> &'static str {
        match self {
            EventKind::Access => "IN_ACCESS",
            EventKind::Attrib => "IN_ATTRIB",
            EventKind::CloseNowrite => "IN_CLOSE_NOWRITE",
            EventKind::CloseWrite => "IN_CLOSE_WRITE",
            EventKind::Create => "IN_CREATE",
            EventKind::Delete => "IN_DELETE",
            EventKind::DeleteSelf => "IN_DELETE_SELF",
            EventKind::Ignored => "IN_IGNORED",
            EventKind::Modify => "IN_MODIFY",
            EventKind::MoveSelf => "IN_MOVE_SELF",
            EventKind::MovedFrom => "IN_MOVED_FROM",
            EventKind::MovedTo => "IN_MOVED_TO",
            EventKind::Open => "IN_OPEN",
            EventKind::QueueOverflow => "IN_Q_OVERFLOW",
            EventKind::Unmount => "IN_UNMOUNT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.maskname())
    }
}

/// One normalized filesystem event
///
/// Immutable value created by the watch manager and consumed once by
/// dispatch. `src_pathname` is populated only for a move-in event whose
/// matching move-out was observed under the same correlation cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// Absolute path the event refers to (empty for queue overflow)
    pub pathname: PathBuf,
    /// Original path of a correlated move, if observed
    pub src_pathname: Option<PathBuf>,
    /// Whether the subject is a directory
    pub is_dir: bool,
}

impl Event {
    /// Create an event with no move source
    pub fn new(kind: EventKind, pathname: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            kind,
            pathname: pathname.into(),
            src_pathname: None,
            is_dir,
        }
    }

    /// The queue-overflow event; carries no path
    pub fn overflow() -> Self {
        Self::new(EventKind::QueueOverflow, PathBuf::new(), false)
    }

    /// Attach the source pathname of a correlated move
    pub fn with_source(mut self, src: impl Into<PathBuf>) -> Self {
        self.src_pathname = Some(src.into());
        self
    }

    /// Kernel-style symbolic name of this event's kind
    pub fn maskname(&self) -> &'static str {
        self.kind.maskname()
    }

    /// The path as a str, lossy for non-UTF-8 names
    pub fn pathname_lossy(&self) -> String {
        self.pathname.to_string_lossy().into_owned()
    }

    /// The scheduling key for this event: its pathname
    pub fn key(&self) -> &Path {
        &self.pathname
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.maskname(), self.pathname.display())
    }
}
