// Deny unused code to catch dead code early
#![deny(unused)]
// Warn on unused dependencies to catch platform-specific cfg mismatches
#![warn(unused_crate_dependencies)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

//! File-operation engine for a two-pane file manager.
//!
//! Copies, moves, renames and deletes across local folders and rclone remotes behind one
//! preview/execute protocol, with per-provider conflict rules, undo for local changes, a
//! coalescing listing cache, and a small boolean search language. [`FileOpsEngine`] is the
//! entry point; progress reaches the UI through an [`EventSink`].

// The logger is set up by the `fileops` binary; the library only uses the `log` facade
use env_logger as _;

pub mod cloud;
pub mod engine;
pub mod entry;
pub mod errors;
pub mod events;
mod ignore_poison;
pub mod listing;
pub mod local;
pub mod names;
pub mod path_ref;
pub mod search;
pub mod settings;
pub mod undo;
pub mod write_operations;

#[cfg(test)]
mod engine_test;
#[cfg(test)]
mod errors_test;

pub use engine::{FileOpsEngine, ItemResult};
pub use entry::{Entry, EntryKind};
pub use errors::{EngineError, ErrorCode};
pub use events::{EngineEvent, EventSink, NoopSink};
pub use path_ref::PathRef;
pub use settings::EngineSettings;
