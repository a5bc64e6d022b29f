//! Decision assembly.

use serde::Serialize;

use crate::facts::ApplicantFacts;
use crate::parser::Term;
use crate::ruleset::{RuleSet, RuleSetRef};
use crate::tiers::{DecisionPredicate, RatePremium, Resolution, RiskCategory, Tier};

/// Value a classification predicate mapped the subject to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub predicate: String,
    pub value: Term,
}

/// The immutable, audit-friendly outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub tier: Tier,
    pub risk: RiskCategory,
    pub rate_premium: RatePremium,

    /// Decision predicates that held, in evaluation order
    pub fired: Vec<DecisionPredicate>,

    /// Classification values, in rule set reporting order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<Classification>,

    pub rule_set: RuleSetRef,
    pub facts: ApplicantFacts,
}

impl DecisionRecord {
    pub fn classification(&self, predicate: &str) -> Option<&Term> {
        self.classifications
            .iter()
            .find(|c| c.predicate == predicate)
            .map(|c| &c.value)
    }

    /// True for the two unconditional approval tiers.
    pub fn is_approved(&self) -> bool {
        matches!(self.tier, Tier::AutoApproved | Tier::StandardApproved)
    }
}

/// Package a resolved cascade into a decision record. Pure, no I/O.
pub fn assemble(
    resolution: Resolution,
    facts: &ApplicantFacts,
    rule_set: &RuleSet,
    classifications: Vec<Classification>,
) -> DecisionRecord {
    DecisionRecord {
        tier: resolution.tier,
        risk: resolution.risk,
        rate_premium: resolution.premium,
        fired: resolution.fired,
        classifications,
        rule_set: rule_set.reference(),
        facts: facts.clone(),
    }
}
