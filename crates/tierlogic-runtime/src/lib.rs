//! # tierlogic-runtime
//!
//! Tier decisions over an external logic engine.
//!
//! This crate owns everything with process lifecycle in it: starting the
//! engine, bounding every query by a deadline, discarding sessions that
//! time out, and making sure no engine outlives its request.
//!
//! The deterministic pieces (fact encoding, result parsing, the tier
//! cascade) live in `tierlogic-core`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tierlogic_runtime::{DecisionEvaluator, EvaluatorConfig};
//! use tierlogic_core::{ApplicantFacts, FactSchema, RuleSet};
//!
//! let evaluator = DecisionEvaluator::scryer(EvaluatorConfig::default()).await?;
//! let facts = ApplicantFacts::from_json(&record, &FactSchema::loan_application())?;
//! let decision = evaluator.evaluate(&facts, &RuleSet::loan_default()?).await?;
//!
//! println!("{}: {} risk, premium {}", decision.tier, decision.risk, decision.rate_premium);
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod scryer;
pub mod session;

#[cfg(test)]
mod testing;

pub use backend::{SolverBackend, SolverConnection, SolverError};
pub use cache::{CacheKey, DecisionCache};
pub use config::{CacheConfig, ConfigError, EvaluatorConfig, SolverConfig};
pub use error::DecisionError;
pub use evaluator::{DecisionEvaluator, EvaluationReport, EvaluatorStats};
pub use scryer::ScryerBackend;
pub use session::{request_program, SessionOptions, SessionState, SolverSession};
