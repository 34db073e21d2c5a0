//! First-match rule engine for file manipulation
//!
//! A [`FileManager`] holds an ordered list of [`Rule`]s. Given an event
//! path it applies exactly the first rule whose source pattern matches:
//! move, copy, or delete, with optional destination auto-creation and
//! mode/ownership control. A failed action aborts that rule; later rules
//! are never consulted for the same event.

pub mod manager;
pub mod rule;

pub use manager::FileManager;
pub use rule::{Action, Rule, RuleError};
