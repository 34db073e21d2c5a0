//! Core event model for fswatchd
//!
//! This crate defines the vocabulary shared by every other crate:
//! - Normalized filesystem events ([`Event`], [`EventKind`])
//! - The task abstraction schedulers execute ([`Task`])
//! - Event routing ([`EventMap`], [`Handler`], [`HandlerRef`])

pub mod event;
pub mod router;
pub mod task;

pub use event::{Event, EventKind};
pub use router::{EventMap, Handler, HandlerRef};
pub use task::{Task, TaskId};
