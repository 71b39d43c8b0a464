//! Core of the Orus web playground.
//!
//! The language itself (parser, checker, compiler, VM) ships as a prebuilt
//! wasm artifact and is not built here. This crate drives it:
//!
//!   artifact on disk (manifest + payload)
//!     -> loader     (one shared load attempt per process)
//!     -> bridge     (init once, run source, normalize errors)
//!     -> playground (tabs, transcript, debounced persistence)
//!
//! Views (web UI, CLI) should depend on [`Playground`] and its
//! [`Snapshot`] rather than talking to the runtime directly.

// ---------------------------------------------------------------------
// Errors and configuration
// ---------------------------------------------------------------------

pub mod config;
pub mod error;

// ---------------------------------------------------------------------
// Runtime artifact: location, host bindings, loading, execution
// ---------------------------------------------------------------------

pub mod artifact;
pub mod bridge;
pub mod loader;
pub mod runtime;

// ---------------------------------------------------------------------
// Playground state: tabs, transcript, persistence
// ---------------------------------------------------------------------

pub mod debounce;
pub mod files;
pub mod playground;
pub mod storage;
pub mod transcript;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use bridge::{ExecutionBridge, Executor};
pub use config::PlaygroundConfig;
pub use error::{ExecutionError, LoadError, PersistenceError};
pub use files::{FileId, FileTab};
pub use loader::{LoadStatus, RuntimeLoader};
pub use playground::{Playground, RunOutcome, Snapshot};
pub use transcript::{OutputLine, Severity};
