//! Request-level errors.

use std::time::Duration;

use thiserror::Error;

use tierlogic_core::{EngineError, RuleSetError, SchemaError};

use crate::config::ConfigError;
use crate::session::SessionState;

/// Errors that abort an evaluation. No partial decision is ever returned
/// alongside one of these.
#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("Invalid facts: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid rule set: {0}")]
    RuleSet(#[from] RuleSetError),

    #[error("Rule set '{rule_set}' failed to load{}: {message}", at_line(.line))]
    RuleCompile {
        rule_set: String,
        line: Option<u32>,
        message: String,
    },

    #[error("Solver engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Query '{goal}' exceeded its {deadline:?} deadline")]
    QueryTimeout { goal: String, deadline: Duration },

    #[error("Query '{goal}' failed in the engine: {error}")]
    Engine { goal: String, error: EngineError },

    #[error("Resolution aborted at '{predicate}': {reason}")]
    ResolutionAborted { predicate: String, reason: String },

    #[error("Solver session is {state}")]
    SessionUnusable { state: SessionState },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

fn at_line(line: &Option<u32>) -> String {
    match line {
        Some(n) => format!(" at line {}", n),
        None => String::new(),
    }
}

impl DecisionError {
    /// True when a fresh session might succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DecisionError::QueryTimeout { .. }
                | DecisionError::EngineUnavailable(_)
                | DecisionError::SessionUnusable { .. }
        )
    }
}
