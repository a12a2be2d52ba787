//! StoryDaemon - story scheduling and session persistence
//!
//! Runs the single-writer side of the story store for a multi-agent
//! orchestrator: on startup it reconciles whatever the previous process left
//! behind, then serializes every agent's reads and writes through one
//! request processor.
//!
//! # Modules
//!
//! - [`persistence`] - request processor and startup recovery
//! - [`queue`] - in-memory scheduling queue
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod persistence;
pub mod queue;

pub use config::Config;
pub use persistence::{Bootstrap, PersistenceError, PersistenceHandle, RecoveryStats, RequestProcessor, bootstrap};
pub use queue::StoryQueue;
