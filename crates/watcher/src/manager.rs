//! Watch registration and raw-event normalization
//!
//! One [`WatchManager`] owns a single inotify instance shared by every
//! [`Watch`]. It keeps the descriptor⇄path tables, stages move-out events
//! by rename cookie, and forwards each normalized [`Event`] to the event
//! map of the watch that produced it.

use crate::Watch;
use anyhow::{Context, Result};
use fsw_core::{Event, EventKind};
use inotify::{EventMask, EventOwned, EventStream, Inotify, WatchDescriptor, WatchMask, Watches};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// How long a staged move-out waits for its matching move-in
const MOVE_WINDOW: Duration = Duration::from_secs(2);

/// Index of a [`Watch`] declaration within its manager
pub type WatchId = usize;

/// One live kernel watch
struct WdEntry {
    path: PathBuf,
    watch: WatchId,
}

/// A move-out waiting for the move-in with the same cookie
struct PendingMove {
    src: PathBuf,
    is_dir: bool,
    staged: Instant,
}

/// Maintains the dynamic watch set and normalizes kernel notifications
pub struct WatchManager {
    /// Taken by [`WatchManager::event_stream`]; registrations continue
    /// through the cloned `watches` handle afterwards
    inotify: Option<Inotify>,
    watches: Watches,
    /// Watch declarations; `None` marks a removed watch
    decls: Vec<Option<Watch>>,
    wd_table: HashMap<WatchDescriptor, WdEntry>,
    /// Invariant: at most one live descriptor per directory
    path_table: HashMap<PathBuf, WatchDescriptor>,
    pending_moves: HashMap<u32, PendingMove>,
}

impl WatchManager {
    pub fn new() -> Result<Self> {
        let inotify = Inotify::init().context("failed to initialize inotify")?;
        let watches = inotify.watches();
        Ok(Self {
            inotify: Some(inotify),
            watches,
            decls: Vec::new(),
            wd_table: HashMap::new(),
            path_table: HashMap::new(),
            pending_moves: HashMap::new(),
        })
    }

    /// Register a watch declaration and expand it into kernel watches
    ///
    /// Registration failures (missing path, permission denied) are logged
    /// and skipped; they never abort the rest of the tree walk or the
    /// daemon.
    pub fn add_watch(&mut self, watch: Watch) -> WatchId {
        let id = self.decls.len();
        let root = watch.path.clone();
        let recursive = watch.recursive;

        info!("start listening for events on '{}'", root.display());
        self.decls.push(Some(watch));
        self.register_tree(&root, id, recursive);
        id
    }

    /// Remove a watch declaration and every descriptor it owns
    pub fn remove_watch(&mut self, id: WatchId) {
        let Some(watch) = self.decls.get_mut(id).and_then(Option::take) else {
            return;
        };

        let owned: Vec<WatchDescriptor> = self
            .wd_table
            .iter()
            .filter(|(_, entry)| entry.watch == id)
            .map(|(wd, _)| wd.clone())
            .collect();
        for wd in owned {
            let _ = self.watches.remove(wd.clone());
            self.drop_descriptor(&wd);
        }

        info!("stop listening for events on '{}'", watch.path.display());
    }

    /// Remove every watch; the daemon calls this at shutdown
    pub fn stop(&mut self) {
        for id in 0..self.decls.len() {
            self.remove_watch(id);
        }
    }

    /// Number of live kernel watches
    pub fn watch_count(&self) -> usize {
        self.wd_table.len()
    }

    /// Number of staged move-out events awaiting correlation
    pub fn pending_move_count(&self) -> usize {
        self.pending_moves.len()
    }

    /// Take the raw notification stream
    ///
    /// Can be taken once; watch registration keeps working afterwards.
    pub fn event_stream(&mut self) -> Result<EventStream<Vec<u8>>> {
        let inotify = self
            .inotify
            .take()
            .context("event stream already taken")?;
        inotify
            .into_event_stream(vec![0u8; 4096])
            .context("failed to open inotify event stream")
    }

    /// Process one raw kernel notification
    ///
    /// Resolves the path, applies the owning watch's exclude filter,
    /// maintains the watch set (auto-add, descriptor removal, move
    /// re-pathing) and dispatches the normalized event.
    pub fn process_raw(&mut self, raw: EventOwned) {
        self.expire_pending_moves();

        // Overflow carries no valid descriptor; fan out to every watch
        if raw.mask.contains(EventMask::Q_OVERFLOW) {
            warn!("kernel event queue overflowed, events were lost");
            let event = Event::overflow();
            for decl in self.decls.iter().flatten() {
                decl.event_map.dispatch(&event);
            }
            return;
        }

        let Some(entry) = self.wd_table.get(&raw.wd) else {
            debug!("event for unknown watch descriptor, dropping");
            return;
        };
        let watch_id = entry.watch;
        let pathname = match &raw.name {
            Some(name) => entry.path.join(name),
            None => entry.path.clone(),
        };

        let Some(kind) = kind_from_mask(raw.mask) else {
            debug!("unhandled event mask {:?} for '{}'", raw.mask, pathname.display());
            return;
        };
        let is_dir = raw.mask.contains(EventMask::ISDIR);

        // The kernel dropped the watch (directory deleted or unmounted)
        if kind == EventKind::Ignored {
            self.drop_descriptor(&raw.wd);
        }

        let (excluded, auto_add) = match self.decls.get(watch_id).and_then(Option::as_ref) {
            Some(decl) => (decl.exclude.is_excluded(&pathname), decl.auto_add),
            None => return,
        };
        if excluded {
            return;
        }

        let mut event = Event::new(kind, pathname.clone(), is_dir);

        match kind {
            EventKind::MovedFrom => {
                self.pending_moves.insert(
                    raw.cookie,
                    PendingMove {
                        src: pathname.clone(),
                        is_dir,
                        staged: Instant::now(),
                    },
                );
            }
            EventKind::MovedTo => {
                if let Some(pending) = self.pending_moves.remove(&raw.cookie) {
                    if pending.is_dir {
                        self.repath_descriptors(&pending.src, &pathname);
                    }
                    event = event.with_source(pending.src);
                }
            }
            _ => {}
        }

        // A directory appearing under an auto-add watch gets watches of
        // its own, including anything already created inside it
        if is_dir && auto_add && matches!(kind, EventKind::Create | EventKind::MovedTo) {
            self.register_tree(&pathname, watch_id, true);
        }

        if let Some(decl) = self.decls.get(watch_id).and_then(Option::as_ref) {
            decl.event_map.dispatch(&event);
        }
    }

    /// Register `root` and, if requested, every directory beneath it
    fn register_tree(&mut self, root: &Path, id: WatchId, recursive: bool) {
        let exclude = match self.decls.get(id).and_then(Option::as_ref) {
            Some(decl) => decl.exclude.clone(),
            None => return,
        };
        if exclude.is_excluded(root) {
            debug!("'{}' excluded, not watching", root.display());
            return;
        }

        if !self.register_one(root, id) || !root.is_dir() || !recursive {
            return;
        }

        // Symlinked directories are never traversed
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.file_type().is_dir() && !exclude.is_excluded(e.path()));
        for entry in walker {
            match entry {
                Ok(entry) => {
                    self.register_one(entry.path(), id);
                }
                Err(e) => warn!("failed to walk below '{}': {e}", root.display()),
            }
        }
    }

    /// Register a single kernel watch; false on failure
    fn register_one(&mut self, path: &Path, id: WatchId) -> bool {
        if self.path_table.contains_key(path) {
            debug!("'{}' already watched", path.display());
            return true;
        }

        match self.watches.add(path, WatchMask::ALL_EVENTS) {
            Ok(wd) => {
                debug!("watching '{}'", path.display());
                self.wd_table.insert(
                    wd.clone(),
                    WdEntry {
                        path: path.to_path_buf(),
                        watch: id,
                    },
                );
                self.path_table.insert(path.to_path_buf(), wd);
                true
            }
            Err(e) => {
                warn!("failed to watch '{}': {e}", path.display());
                false
            }
        }
    }

    fn drop_descriptor(&mut self, wd: &WatchDescriptor) {
        if let Some(entry) = self.wd_table.remove(wd) {
            self.path_table.remove(&entry.path);
            debug!("dropped watch on '{}'", entry.path.display());
        }
    }

    /// Rewrite tracked paths after a watched directory moved within the
    /// observed tree, so later events report the new location
    fn repath_descriptors(&mut self, old: &Path, new: &Path) {
        let affected: Vec<(WatchDescriptor, PathBuf)> = self
            .wd_table
            .iter()
            .filter(|(_, entry)| entry.path.starts_with(old))
            .map(|(wd, entry)| (wd.clone(), entry.path.clone()))
            .collect();

        for (wd, path) in affected {
            let Ok(suffix) = path.strip_prefix(old) else {
                continue;
            };
            let new_path = new.join(suffix);
            debug!(
                "tracked path moved: '{}' -> '{}'",
                path.display(),
                new_path.display()
            );
            if let Some(entry) = self.wd_table.get_mut(&wd) {
                entry.path = new_path.clone();
            }
            self.path_table.remove(&path);
            self.path_table.insert(new_path, wd);
        }
    }

    /// Discard staged move-outs whose move-in never arrived
    fn expire_pending_moves(&mut self) {
        if self.pending_moves.is_empty() {
            return;
        }

        let now = Instant::now();
        let expired: Vec<u32> = self
            .pending_moves
            .iter()
            .filter(|(_, p)| now.duration_since(p.staged) > MOVE_WINDOW)
            .map(|(cookie, _)| *cookie)
            .collect();

        for cookie in expired {
            let Some(pending) = self.pending_moves.remove(&cookie) else {
                continue;
            };
            debug!(
                "move-out of '{}' never matched, discarding",
                pending.src.display()
            );

            // The directory left every watched tree; its descriptors are stale
            if pending.is_dir {
                let stale: Vec<WatchDescriptor> = self
                    .wd_table
                    .iter()
                    .filter(|(_, entry)| entry.path.starts_with(&pending.src))
                    .map(|(wd, _)| wd.clone())
                    .collect();
                for wd in stale {
                    let _ = self.watches.remove(wd.clone());
                    self.drop_descriptor(&wd);
                }
            }
        }
    }
}

/// Classify a raw mask into the event kind it reports
fn kind_from_mask(mask: EventMask) -> Option<EventKind> {
    // Exactly one event bit is set per notification; ISDIR rides along
    if mask.contains(EventMask::Q_OVERFLOW) {
        Some(EventKind::QueueOverflow)
    } else if mask.contains(EventMask::UNMOUNT) {
        Some(EventKind::Unmount)
    } else if mask.contains(EventMask::IGNORED) {
        Some(EventKind::Ignored)
    } else if mask.contains(EventMask::ACCESS) {
        Some(EventKind::Access)
    } else if mask.contains(EventMask::ATTRIB) {
        Some(EventKind::Attrib)
    } else if mask.contains(EventMask::CLOSE_NOWRITE) {
        Some(EventKind::CloseNowrite)
    } else if mask.contains(EventMask::CLOSE_WRITE) {
        Some(EventKind::CloseWrite)
    } else if mask.contains(EventMask::CREATE) {
        Some(EventKind::Create)
    } else if mask.contains(EventMask::DELETE) {
        Some(EventKind::Delete)
    } else if mask.contains(EventMask::DELETE_SELF) {
        Some(EventKind::DeleteSelf)
    } else if mask.contains(EventMask::MODIFY) {
        Some(EventKind::Modify)
    } else if mask.contains(EventMask::MOVE_SELF) {
        Some(EventKind::MoveSelf)
    } else if mask.contains(EventMask::MOVED_FROM) {
        Some(EventKind::MovedFrom)
    } else if mask.contains(EventMask::MOVED_TO) {
        Some(EventKind::MovedTo)
    } else if mask.contains(EventMask::OPEN) {
        Some(EventKind::Open)
    } else {
        None
    }
}
