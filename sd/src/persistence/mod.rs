//! Persistence with actor pattern
//!
//! RequestProcessor owns the Store and applies requests received over a
//! channel; RecoveryBootstrap reconciles the database before it starts.

mod messages;
mod processor;
mod recovery;

pub use messages::{Operation, PersistenceError, PersistenceResult, Reply, Request};
pub use processor::{PersistenceHandle, RequestProcessor};
pub use recovery::{Bootstrap, RecoveryStats, RestoredAgents, bootstrap};
