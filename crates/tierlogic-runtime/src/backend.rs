//! The adapter boundary to an external logic engine.
//!
//! A [`SolverBackend`] knows how to start an engine with a program loaded.
//! The resulting [`SolverConnection`] answers one goal at a time in the
//! marker protocol understood by [`tierlogic_core::parse`]. Nothing above
//! this boundary sees engine-specific syntax.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use tierlogic_core::{Goal, RawResult};

/// Errors from a solver adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Solver executable not found: {0}")]
    NotFound(String),

    #[error("Failed to launch solver: {0}")]
    Launch(String),

    #[error("Program failed to load: {message}")]
    Compile { line: Option<u32>, message: String },

    #[error("Solver I/O failed: {0}")]
    Io(String),

    #[error("Solver exited unexpectedly: {0}")]
    Exited(String),
}

impl From<std::io::Error> for SolverError {
    fn from(e: std::io::Error) -> Self {
        SolverError::Io(e.to_string())
    }
}

/// Starts engine instances.
#[async_trait]
pub trait SolverBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Start a fresh engine with `program` loaded.
    ///
    /// Returns only once the engine is ready for its first goal. Load
    /// errors reported by the engine are `SolverError::Compile`.
    async fn launch(&self, program: &str) -> Result<Box<dyn SolverConnection>, SolverError>;
}

/// One live engine instance. Used by a single session, one goal at a time.
#[async_trait]
pub trait SolverConnection: Send {
    /// Submit one goal and collect its marker output.
    async fn submit(&mut self, goal: &Goal) -> Result<RawResult, SolverError>;

    /// Ask the engine to exit, killing it after `grace`.
    async fn shutdown(&mut self, grace: Duration);

    /// Kill the engine without waiting. Must be safe to call more than once.
    fn abort(&mut self);
}
