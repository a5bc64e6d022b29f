//! Rule sets: immutable, content-addressed solver programs.
//!
//! A rule set is loaded once and never mutated. Its [`RuleSetId`] is derived
//! from the program text, so two rule sets with the same id are the same
//! program and a session can assert which one it has loaded.

use std::collections::BTreeSet;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::tiers::DecisionPredicate;

/// Embedded default loan decision rules.
const LOAN_DECISION_RULES: &str = include_str!("../rules/loan_decision.pl");

/// Classification predicates, in reporting order.
pub const CLASSIFICATION_PREDICATES: [&str; 8] = [
    "credit_tier",
    "income_tier",
    "employment_stability",
    "debt_ratio_tier",
    "asset_sufficiency",
    "credit_history",
    "age_tier",
    "purpose_risk",
];

lazy_static! {
    /// Clause heads start in column 0: `name(`, `name :-` or `name.`
    static ref CLAUSE_HEAD: Regex = Regex::new(
        r"(?m)^([a-z][A-Za-z0-9_]*)\s*(?:\(|:-|\.)"
    ).unwrap();
    static ref CLAUSE_END: Regex = Regex::new(r"\.\s*(?:%.*)?$").unwrap();
}

/// Errors from constructing a rule set.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleSetError {
    #[error("Rule set '{0}' is empty")]
    Empty(String),

    #[error("Rule set '{rule_set}' does not define decision predicate '{predicate}'")]
    MissingPredicate { rule_set: String, predicate: String },
}

/// Content identity of a rule set: SHA-256 of the program text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleSetId([u8; 32]);

impl RuleSetId {
    fn of(text: &str) -> Self {
        let mut id = [0u8; 32];
        id.copy_from_slice(&Sha256::digest(text.as_bytes()));
        Self(id)
    }
}

impl fmt::Display for RuleSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A loaded, read-only rule set.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    name: String,
    version: Option<String>,
    program: String,
    id: RuleSetId,
    classifications: Vec<String>,
}

impl RuleSet {
    /// Build a rule set from solver clause text.
    pub fn new(name: impl Into<String>, text: &str) -> Result<Self, RuleSetError> {
        let name = name.into();
        let program = sanitize(text);
        if program.trim().is_empty() {
            return Err(RuleSetError::Empty(name));
        }

        let heads: BTreeSet<&str> = CLAUSE_HEAD
            .captures_iter(&program)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        for predicate in DecisionPredicate::ALL {
            if !heads.contains(predicate.name()) {
                return Err(RuleSetError::MissingPredicate {
                    rule_set: name,
                    predicate: predicate.name().to_string(),
                });
            }
        }

        let classifications = CLASSIFICATION_PREDICATES
            .iter()
            .filter(|p| heads.contains(*p))
            .map(|p| p.to_string())
            .collect();

        Ok(Self {
            id: RuleSetId::of(&program),
            name,
            version: None,
            program,
            classifications,
        })
    }

    /// The embedded loan decision rules.
    pub fn loan_default() -> Result<Self, RuleSetError> {
        Ok(Self::new("loan_decision", LOAN_DECISION_RULES)?.with_version("1"))
    }

    /// Tag the rule set with a version label. The id is unaffected.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn id(&self) -> RuleSetId {
        self.id
    }

    /// Program text as it is handed to the solver.
    pub fn program_text(&self) -> &str {
        &self.program
    }

    /// Classification predicates this rule set defines, in reporting order.
    pub fn classifications(&self) -> &[String] {
        &self.classifications
    }

    /// Reference used in decision records.
    pub fn reference(&self) -> RuleSetRef {
        RuleSetRef {
            name: self.name.clone(),
            version: self.version.clone(),
            id: self.id.to_string(),
        }
    }
}

/// Identifies the rule set a decision was made under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub id: String,
}

/// Drop toplevel queries and directives that would run or halt on load.
///
/// A dropped clause may span several lines; everything up to its
/// terminating `.` goes with it.
fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut skipping = false;
    for line in text.lines() {
        if skipping {
            skipping = !ends_clause(line);
            continue;
        }

        let trimmed = line.trim_start();
        let dropped = trimmed.starts_with("?-")
            || (trimmed.starts_with(":-")
                && (trimmed.contains("initialization") || trimmed.contains("halt")));
        if dropped {
            skipping = !ends_clause(line);
            continue;
        }

        out.push_str(line);
        out.push('\n');
    }
    out
}

/// True when the line closes a clause with an end token: a `.` followed by
/// whitespace, a line comment or the end of the line.
fn ends_clause(line: &str) -> bool {
    CLAUSE_END.is_match(line)
}
