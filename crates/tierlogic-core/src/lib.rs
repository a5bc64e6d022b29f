//! # tierlogic-core
//!
//! Deterministic building blocks for tier-based decisions made by an
//! external logic engine.
//!
//! This crate does no I/O. It answers:
//! - What facts does the engine see for this applicant?
//! - What did the engine say about a query?
//! - Which single tier wins when several rules fire?
//!
//! ## Key Guarantees
//!
//! 1. **Exclusive**: Every resolution yields exactly one tier
//! 2. **Isolated**: Encoded facts are self-contained text, never shared
//! 3. **Traceable**: Every record lists the predicates that fired and the
//!    rule set they came from
//! 4. **Deterministic**: Same facts and rules always assemble the same record
//!
//! ## Example
//!
//! ```rust,ignore
//! use tierlogic_core::{assemble, resolve_with, ApplicantFacts, FactSchema, RuleSet};
//!
//! let schema = FactSchema::loan_application();
//! let facts = ApplicantFacts::from_json(&record, &schema)?;
//! let rules = RuleSet::loan_default()?;
//!
//! // `ask` submits `predicate(applicant)` to a solver session
//! let resolution = resolve_with(|p| ask(p.name()))?;
//! let decision = assemble(resolution, &facts, &rules, Vec::new());
//! println!("{} ({})", decision.tier, decision.rate_premium);
//! ```

pub mod decision;
pub mod encoder;
pub mod facts;
pub mod parser;
pub mod query;
pub mod ruleset;
mod schema;
pub mod tiers;

// Re-export main types at crate root
pub use decision::{assemble, Classification, DecisionRecord};
pub use encoder::{encode, quote_atom, EncodedFacts};
pub use facts::{
    ApplicantFacts, FactSchema, FactValue, FactsBuilder, FieldKind, FieldSpec, SchemaError,
    DEFAULT_SUBJECT,
};
pub use parser::{
    compile_diagnostic, parse, parse_for, Answer, CompileDiagnostic, EngineError,
    EngineErrorKind, ParseFailure, ParsedBinding, RawResult, Term,
};
pub use query::{Goal, GoalArg};
pub use ruleset::{RuleSet, RuleSetError, RuleSetId, RuleSetRef, CLASSIFICATION_PREDICATES};
pub use schema::schema_document;
pub use tiers::{
    resolve_with, Cascade, CascadeError, DecisionPredicate, RatePremium, Resolution,
    RiskCategory, Tier,
};
