//! Daemon assembly for fswatchd
//!
//! Configuration loading, the daemon orchestrator, and lock-file
//! management. The `fswatchd` binary is a thin clap front-end over this
//! library; integration tests drive the same entry points.

pub mod config;
pub mod daemon;
pub mod locks;

pub use config::Config;
pub use daemon::Daemon;
pub use locks::DaemonLock;
