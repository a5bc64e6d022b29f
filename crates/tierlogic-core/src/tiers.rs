//! Tier resolution: the stratified negation-as-failure cascade.
//!
//! The host decides the tier, not the solver. Decision predicates are asked
//! one at a time in a fixed order and the first one that holds wins:
//!
//! 1. `auto_reject` → rejected. It has no negative dependencies, so asking it
//!    first cannot change any later stratum, and it vetoes every positive tier.
//! 2. `auto_approve` → auto approved
//! 3. `standard_approve` → standard approved
//! 4. `conditional_approve` → conditionally approved (approved is known false)
//! 5. `manual_review` → needs review (approved and conditional known false)
//! 6. nothing held → rejected (the catch-all branch)
//!
//! Because each tier is only reachable when every earlier stratum is known
//! false, exactly one tier results.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The five decision predicates, in cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPredicate {
    AutoReject,
    AutoApprove,
    StandardApprove,
    ConditionalApprove,
    ManualReview,
}

impl DecisionPredicate {
    /// Cascade order.
    pub const ALL: [DecisionPredicate; 5] = [
        DecisionPredicate::AutoReject,
        DecisionPredicate::AutoApprove,
        DecisionPredicate::StandardApprove,
        DecisionPredicate::ConditionalApprove,
        DecisionPredicate::ManualReview,
    ];

    /// Predicate name in the rule set.
    pub fn name(&self) -> &'static str {
        match self {
            DecisionPredicate::AutoReject => "auto_reject",
            DecisionPredicate::AutoApprove => "auto_approve",
            DecisionPredicate::StandardApprove => "standard_approve",
            DecisionPredicate::ConditionalApprove => "conditional_approve",
            DecisionPredicate::ManualReview => "manual_review",
        }
    }

    /// Tier this predicate grants when it is the first to hold.
    pub fn tier(&self) -> Tier {
        match self {
            DecisionPredicate::AutoReject => Tier::Rejected,
            DecisionPredicate::AutoApprove => Tier::AutoApproved,
            DecisionPredicate::StandardApprove => Tier::StandardApproved,
            DecisionPredicate::ConditionalApprove => Tier::ConditionallyApproved,
            DecisionPredicate::ManualReview => Tier::NeedsReview,
        }
    }
}

impl fmt::Display for DecisionPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final, mutually exclusive classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    AutoApproved,
    StandardApproved,
    ConditionallyApproved,
    NeedsReview,
    Rejected,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::AutoApproved,
        Tier::StandardApproved,
        Tier::ConditionallyApproved,
        Tier::NeedsReview,
        Tier::Rejected,
    ];

    pub fn risk(&self) -> RiskCategory {
        match self {
            Tier::AutoApproved => RiskCategory::Low,
            Tier::StandardApproved | Tier::ConditionallyApproved => RiskCategory::Medium,
            Tier::NeedsReview | Tier::Rejected => RiskCategory::High,
        }
    }

    pub fn premium(&self) -> RatePremium {
        match self {
            Tier::AutoApproved => RatePremium(0),
            Tier::StandardApproved => RatePremium(50),
            Tier::ConditionallyApproved => RatePremium(150),
            Tier::NeedsReview => RatePremium(300),
            Tier::Rejected => RatePremium::NOT_APPLICABLE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::AutoApproved => "auto_approved",
            Tier::StandardApproved => "standard_approved",
            Tier::ConditionallyApproved => "conditionally_approved",
            Tier::NeedsReview => "needs_review",
            Tier::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskCategory::Low => f.write_str("low"),
            RiskCategory::Medium => f.write_str("medium"),
            RiskCategory::High => f.write_str("high"),
        }
    }
}

/// Interest-rate premium in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RatePremium(u32);

impl RatePremium {
    /// Sentinel for rejected applications: no rate applies.
    pub const NOT_APPLICABLE: RatePremium = RatePremium(9999);

    pub fn basis_points(&self) -> u32 {
        self.0
    }

    pub fn is_applicable(&self) -> bool {
        *self != Self::NOT_APPLICABLE
    }
}

impl fmt::Display for RatePremium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_applicable() {
            write!(f, "{} bps", self.0)
        } else {
            f.write_str("n/a")
        }
    }
}

/// Misuse of the cascade state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CascadeError {
    #[error("Cascade expected '{expected}' but '{got}' was recorded")]
    OutOfOrder {
        expected: DecisionPredicate,
        got: DecisionPredicate,
    },

    #[error("Cascade is already resolved; '{0}' was not asked for")]
    AlreadyResolved(DecisionPredicate),

    #[error("Cascade is incomplete; '{0}' has not been evaluated")]
    Incomplete(DecisionPredicate),
}

/// Outcome of the cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub tier: Tier,
    pub risk: RiskCategory,
    pub premium: RatePremium,
    /// Predicates that held, in evaluation order
    pub fired: Vec<DecisionPredicate>,
    /// Every predicate that was evaluated, with its truth value
    pub evaluated: Vec<(DecisionPredicate, bool)>,
}

/// Step-by-step cascade driver.
///
/// The caller asks [`Cascade::next_query`] which predicate to evaluate,
/// evaluates it, and feeds the truth value back with [`Cascade::record`].
/// The cascade never asks for a predicate whose stratum is already decided.
#[derive(Debug, Clone, Default)]
pub struct Cascade {
    evaluated: Vec<(DecisionPredicate, bool)>,
    winner: Option<DecisionPredicate>,
}

impl Cascade {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next predicate to evaluate, or `None` once the tier is known.
    pub fn next_query(&self) -> Option<DecisionPredicate> {
        if self.winner.is_some() {
            return None;
        }
        DecisionPredicate::ALL.get(self.evaluated.len()).copied()
    }

    /// Record the truth value of the predicate returned by `next_query`.
    pub fn record(&mut self, predicate: DecisionPredicate, holds: bool) -> Result<(), CascadeError> {
        let expected = self
            .next_query()
            .ok_or(CascadeError::AlreadyResolved(predicate))?;
        if expected != predicate {
            return Err(CascadeError::OutOfOrder {
                expected,
                got: predicate,
            });
        }

        tracing::trace!(predicate = %predicate, holds, "Cascade step");
        self.evaluated.push((predicate, holds));
        if holds {
            self.winner = Some(predicate);
        }
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.next_query().is_none()
    }

    /// Finish the cascade. Fails if a required predicate was never evaluated.
    pub fn resolve(self) -> Result<Resolution, CascadeError> {
        if let Some(pending) = self.next_query() {
            return Err(CascadeError::Incomplete(pending));
        }

        // No winner after every stratum is the catch-all rejection.
        let tier = self.winner.map(|p| p.tier()).unwrap_or(Tier::Rejected);
        let fired = self
            .evaluated
            .iter()
            .filter(|(_, holds)| *holds)
            .map(|(p, _)| *p)
            .collect();

        Ok(Resolution {
            tier,
            risk: tier.risk(),
            premium: tier.premium(),
            fired,
            evaluated: self.evaluated,
        })
    }
}

/// Run the whole cascade against a synchronous oracle.
///
/// The first oracle error aborts resolution and is returned unchanged.
pub fn resolve_with<E, F>(mut oracle: F) -> Result<Resolution, E>
where
    F: FnMut(DecisionPredicate) -> Result<bool, E>,
    E: From<CascadeError>,
{
    let mut cascade = Cascade::new();
    while let Some(predicate) = cascade.next_query() {
        let holds = oracle(predicate)?;
        cascade.record(predicate, holds)?;
    }
    Ok(cascade.resolve()?)
}
