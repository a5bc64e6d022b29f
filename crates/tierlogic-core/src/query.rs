//! Typed solver goals.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoder::quote_atom;

/// One argument of a goal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum GoalArg {
    /// A ground atom, quoted on render if needed.
    Atom(String),

    /// A logic variable whose binding is reported back.
    Var(String),
}

/// A single logical goal submitted to the solver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Goal {
    pub predicate: String,
    pub args: Vec<GoalArg>,
}

impl Goal {
    /// `predicate(subject)`: does the predicate hold for the subject?
    pub fn holds(predicate: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            predicate: predicate.into(),
            args: vec![GoalArg::Atom(subject.into())],
        }
    }

    /// `predicate(subject, Var)`: what value does the subject map to?
    pub fn lookup(
        predicate: impl Into<String>,
        subject: impl Into<String>,
        var: impl Into<String>,
    ) -> Self {
        Self {
            predicate: predicate.into(),
            args: vec![GoalArg::Atom(subject.into()), GoalArg::Var(var.into())],
        }
    }

    /// Variables in argument order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|a| match a {
            GoalArg::Var(v) => Some(v.as_str()),
            GoalArg::Atom(_) => None,
        })
    }

    /// Solver syntax for the bare goal, e.g. `credit_tier(applicant, Value)`.
    pub fn render(&self) -> String {
        if self.args.is_empty() {
            return quote_atom(&self.predicate);
        }

        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| match a {
                GoalArg::Atom(s) => quote_atom(s),
                GoalArg::Var(v) => v.clone(),
            })
            .collect();

        format!("{}({})", quote_atom(&self.predicate), args.join(", "))
    }

    /// True when every variable name is a valid, non-anonymous variable.
    pub fn is_well_formed(&self) -> bool {
        self.variables().all(|v| {
            let mut chars = v.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
