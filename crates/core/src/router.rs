//! Event routing
//!
//! An [`EventMap`] maps each event kind to an ordered list of handler
//! references. A reference either invokes a handler's `schedule` or its
//! `cancel` operation; which one is fixed at configuration time via the
//! [`HandlerRef`] variant, not decided at dispatch time.

use crate::{Event, EventKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A scheduling endpoint events can be routed to
///
/// Both operations are bookkeeping only and must return without blocking;
/// any deferred or long-running work is spawned, never awaited here.
pub trait Handler: Send + Sync {
    /// Logical name for diagnostics
    fn name(&self) -> &str;

    /// Schedule (or reschedule) work for this event
    fn schedule(&self, event: &Event);

    /// Cancel pending work for this event's key, if any
    fn cancel(&self, event: &Event);
}

/// A reference to one handler operation
///
/// The tagged variant decides which operation dispatch performs.
#[derive(Clone)]
pub enum HandlerRef {
    /// Call `handler.schedule(event)`
    Invoke(Arc<dyn Handler>),
    /// Call `handler.cancel(event)`
    Cancel(Arc<dyn Handler>),
}

impl HandlerRef {
    /// Perform the referenced operation
    pub fn call(&self, event: &Event) {
        match self {
            HandlerRef::Invoke(handler) => handler.schedule(event),
            HandlerRef::Cancel(handler) => handler.cancel(event),
        }
    }

    /// The underlying handler
    pub fn handler(&self) -> &Arc<dyn Handler> {
        match self {
            HandlerRef::Invoke(handler) | HandlerRef::Cancel(handler) => handler,
        }
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerRef::Invoke(h) => write!(f, "Invoke({})", h.name()),
            HandlerRef::Cancel(h) => write!(f, "Cancel({})", h.name()),
        }
    }
}

/// Mapping from event kind to an ordered handler list
///
/// Built once at configuration time and never mutated afterwards. A kind
/// with no entry is discarded at dispatch; an entry set to `None` removes
/// the kind (explicit ignore, overriding any default handler).
#[derive(Default)]
pub struct EventMap {
    entries: HashMap<EventKind, Vec<HandlerRef>>,
}

impl EventMap {
    /// Empty map; every event is discarded until entries are set
    pub fn new() -> Self {
        Self::default()
    }

    /// Map that routes every kind to `default` unless overridden
    pub fn with_default(default: Vec<HandlerRef>) -> Self {
        let mut map = Self::new();
        for kind in EventKind::ALL {
            map.entries.insert(kind, default.clone());
        }
        map
    }

    /// Set or clear the handler list for one kind
    ///
    /// `None` (and an empty list) mean "ignore this kind", even when the
    /// map was built with a default handler.
    pub fn set(&mut self, kind: EventKind, handlers: Option<Vec<HandlerRef>>) {
        match handlers {
            Some(list) if !list.is_empty() => {
                self.entries.insert(kind, list);
            }
            _ => {
                self.entries.remove(&kind);
            }
        }
    }

    /// Handler list registered for a kind
    pub fn handlers(&self, kind: EventKind) -> Option<&[HandlerRef]> {
        self.entries.get(&kind).map(Vec::as_slice)
    }

    /// True if no kind has any handler
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispatch one event to its handler list, in declared order
    pub fn dispatch(&self, event: &Event) {
        match self.entries.get(&event.kind) {
            Some(handlers) => {
                for handler in handlers {
                    handler.call(event);
                }
            }
            None => debug!("no handler for {event}, discarding"),
        }
    }
}

impl fmt::Debug for EventMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}
