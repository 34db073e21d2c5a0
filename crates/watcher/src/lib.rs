//! Kernel watch management for fswatchd
//!
//! This crate translates [`Watch`] declarations into a live set of
//! inotify watches and a normalized event stream:
//! - Recursive expansion of directory trees into per-directory watches
//! - Auto-registration of newly created subdirectories
//! - Exclude filtering before registration and per event
//! - Move-event correlation via the kernel rename cookie

pub mod exclude;
pub mod manager;

pub use exclude::ExcludeFilter;
pub use manager::{WatchId, WatchManager};

use fsw_core::EventMap;
use std::path::{Path, PathBuf};

/// Declaration of one watched tree
///
/// Owned by the watch manager for the daemon's lifetime; the referenced
/// [`EventMap`] receives every retained event under this root.
pub struct Watch {
    /// Root path to watch (directory or single file)
    pub path: PathBuf,
    /// Expand the directory tree into individual watches
    pub recursive: bool,
    /// Register watches for subdirectories created later
    pub auto_add: bool,
    /// Paths to skip entirely
    pub exclude: ExcludeFilter,
    /// Router receiving this watch's events
    pub event_map: EventMap,
}

impl Watch {
    /// Watch a single path, non-recursive, with no excludes
    pub fn new(path: impl Into<PathBuf>, event_map: EventMap) -> Self {
        Self {
            path: path.into(),
            recursive: false,
            auto_add: false,
            exclude: ExcludeFilter::empty(),
            event_map,
        }
    }

    /// Expand the whole directory tree
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Follow subdirectories created while watching
    pub fn with_auto_add(mut self, auto_add: bool) -> Self {
        self.auto_add = auto_add;
        self
    }

    /// Skip paths matching the filter
    pub fn with_exclude(mut self, exclude: ExcludeFilter) -> Self {
        self.exclude = exclude;
        self
    }

    /// The watched root
    pub fn path(&self) -> &Path {
        &self.path
    }
}
