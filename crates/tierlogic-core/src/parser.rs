//! Result parser: raw solver output to typed answers.
//!
//! Adapters report each query's outcome with line markers so the answer can
//! be read without depending on the engine's toplevel formatting:
//!
//! ```text
//! @@SOLUTION
//! @@BIND Value=excellent
//! @@END
//! ```
//!
//! `@@NO_SOLUTION` and `@@ERROR <term>` are the other two outcomes. Anything
//! that does not start with `@@` is engine chatter and is ignored.

use std::collections::BTreeMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::Goal;

pub const MARKER_SOLUTION: &str = "@@SOLUTION";
pub const MARKER_BIND: &str = "@@BIND ";
pub const MARKER_NO_SOLUTION: &str = "@@NO_SOLUTION";
pub const MARKER_ERROR: &str = "@@ERROR ";
pub const MARKER_END: &str = "@@END";
pub const MARKER_READY: &str = "@@READY";

lazy_static! {
    static ref INTEGER: Regex = Regex::new(r"^-?\d+$").unwrap();
    static ref FLOAT: Regex = Regex::new(r"^-?\d+\.\d+(?:[eE][+-]?\d+)?$").unwrap();
    static ref RATIONAL: Regex = Regex::new(r"^(-?\d+)\s*rdiv\s*(\d+)$").unwrap();
    static ref PLAIN_ATOM: Regex = Regex::new(r"^[a-z][A-Za-z0-9_]*$").unwrap();
    static ref VARIABLE: Regex = Regex::new(r"^[A-Z][A-Za-z0-9_]*$").unwrap();
    static ref DIAGNOSTIC_LINE: Regex =
        Regex::new(r"(?i)(?:line[\s:]+(\d+))|(?::(\d+)\)\.?\s*$)").unwrap();
    /// An `error(...)` term or a syntax error report. Predicate names that
    /// merely contain "error" do not match.
    static ref ERROR_REPORT: Regex =
        Regex::new(r"(?:\berror\()|(?i:syntax[ _]error)").unwrap();
}

/// Raw output of one query as captured by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResult {
    /// Protocol lines, in order
    pub lines: Vec<String>,

    /// Other engine output seen while the query ran
    pub diagnostics: Vec<String>,
}

impl RawResult {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            diagnostics: Vec::new(),
        }
    }
}

/// A decoded solver term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Term {
    Integer(i64),
    Float(f64),
    Rational { numer: i64, denom: i64 },
    Atom(String),
    Str(String),
    /// Compound terms and integers beyond 64 bits, verbatim
    Other(String),
}

impl Term {
    /// Decode `writeq/1` output.
    pub fn parse(text: &str) -> Term {
        let text = text.trim();

        if INTEGER.is_match(text) {
            return text
                .parse()
                .map(Term::Integer)
                .unwrap_or_else(|_| Term::Other(text.to_string()));
        }

        if FLOAT.is_match(text) {
            if let Ok(f) = text.parse() {
                return Term::Float(f);
            }
        }

        if let Some(caps) = RATIONAL.captures(text) {
            let numer = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let denom = caps.get(2).and_then(|m| m.as_str().parse().ok());
            if let (Some(numer), Some(denom)) = (numer, denom) {
                if denom != 0 {
                    return Term::Rational { numer, denom };
                }
            }
            return Term::Other(text.to_string());
        }

        if PLAIN_ATOM.is_match(text) || text == "[]" {
            return Term::Atom(text.to_string());
        }

        if let Some(inner) = strip_quotes(text, '\'') {
            return Term::Atom(unescape(inner));
        }

        if let Some(inner) = strip_quotes(text, '"') {
            return Term::Str(unescape(inner));
        }

        Term::Other(text.to_string())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Term::Integer(i) => Some(*i),
            Term::Rational { numer, denom } if *denom == 1 => Some(*numer),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Term::Integer(i) => Some(*i as f64),
            Term::Float(f) => Some(*f),
            Term::Rational { numer, denom } => Some(*numer as f64 / *denom as f64),
            _ => None,
        }
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(a) => Some(a),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Integer(i) => write!(f, "{}", i),
            Term::Float(x) => write!(f, "{:?}", x),
            Term::Rational { numer, denom } => write!(f, "{} rdiv {}", numer, denom),
            Term::Atom(a) => f.write_str(a),
            Term::Str(s) => write!(f, "{:?}", s),
            Term::Other(o) => f.write_str(o),
        }
    }
}

fn strip_quotes(text: &str, quote: char) -> Option<&str> {
    if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
        Some(&text[1..text.len() - 1])
    } else {
        None
    }
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Variable bindings of one solution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedBinding {
    bindings: BTreeMap<String, Term>,
}

impl ParsedBinding {
    pub fn get(&self, var: &str) -> Option<&Term> {
        self.bindings.get(var)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Category of a solver-reported runtime fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    Type,
    Arithmetic,
    UndefinedPredicate,
    Instantiation,
    Syntax,
    Other,
}

/// A runtime fault reported by the solver for one query.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?} error: {term}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    /// The thrown term, verbatim
    pub term: String,
}

impl EngineError {
    pub fn from_term(term: &str) -> Self {
        let term = term.trim();
        let formal = term
            .strip_prefix("error(")
            .unwrap_or("")
            .trim_start();

        let kind = if formal.starts_with("type_error") || formal.starts_with("domain_error") {
            EngineErrorKind::Type
        } else if formal.starts_with("evaluation_error") {
            EngineErrorKind::Arithmetic
        } else if formal.starts_with("existence_error(procedure") {
            EngineErrorKind::UndefinedPredicate
        } else if formal.starts_with("instantiation_error") {
            EngineErrorKind::Instantiation
        } else if formal.starts_with("syntax_error") {
            EngineErrorKind::Syntax
        } else {
            EngineErrorKind::Other
        };

        Self {
            kind,
            term: term.to_string(),
        }
    }
}

/// Typed outcome of one query.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Solution(ParsedBinding),
    /// Logical failure. Expected, not an error.
    NoSolution,
    Error(EngineError),
}

impl Answer {
    pub fn is_solution(&self) -> bool {
        matches!(self, Answer::Solution(_))
    }
}

/// Raw output that does not follow the marker protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("Output ended without an end marker")]
    Truncated,

    #[error("End marker reached without an outcome")]
    MissingOutcome,

    #[error("More than one outcome reported")]
    ConflictingOutcomes,

    #[error("Malformed binding line: {0}")]
    MalformedBinding(String),

    #[error("Variable {0} was not bound by the solution")]
    UnboundVariable(String),

    #[error("Unknown protocol marker: {0}")]
    UnknownMarker(String),
}

/// Parse the marker lines of one query.
pub fn parse(raw: &RawResult) -> Result<Answer, ParseFailure> {
    let mut outcome: Option<Answer> = None;
    let mut bindings: BTreeMap<String, Term> = BTreeMap::new();

    for line in &raw.lines {
        let line = line.trim_end();
        if !line.starts_with("@@") {
            continue;
        }

        if line == MARKER_END {
            return match outcome {
                Some(Answer::Solution(_)) => Ok(Answer::Solution(ParsedBinding { bindings })),
                Some(other) => Ok(other),
                None => Err(ParseFailure::MissingOutcome),
            };
        } else if line == MARKER_SOLUTION {
            set_outcome(&mut outcome, Answer::Solution(ParsedBinding::default()))?;
        } else if line == MARKER_NO_SOLUTION {
            set_outcome(&mut outcome, Answer::NoSolution)?;
        } else if let Some(term) = line.strip_prefix(MARKER_ERROR) {
            set_outcome(&mut outcome, Answer::Error(EngineError::from_term(term)))?;
        } else if let Some(binding) = line.strip_prefix(MARKER_BIND) {
            if !matches!(outcome, Some(Answer::Solution(_))) {
                return Err(ParseFailure::MalformedBinding(line.to_string()));
            }
            let (var, value) = binding
                .split_once('=')
                .ok_or_else(|| ParseFailure::MalformedBinding(line.to_string()))?;
            let var = var.trim();
            if !VARIABLE.is_match(var) || bindings.contains_key(var) {
                return Err(ParseFailure::MalformedBinding(line.to_string()));
            }
            bindings.insert(var.to_string(), Term::parse(value));
        } else if line == MARKER_READY {
            continue;
        } else {
            return Err(ParseFailure::UnknownMarker(line.to_string()));
        }
    }

    Err(ParseFailure::Truncated)
}

/// Parse and check that a solution binds every variable of the goal.
pub fn parse_for(goal: &Goal, raw: &RawResult) -> Result<Answer, ParseFailure> {
    let answer = parse(raw)?;
    if let Answer::Solution(binding) = &answer {
        if let Some(missing) = goal.variables().find(|v| binding.get(v).is_none()) {
            return Err(ParseFailure::UnboundVariable(missing.to_string()));
        }
    }
    Ok(answer)
}

fn set_outcome(slot: &mut Option<Answer>, answer: Answer) -> Result<(), ParseFailure> {
    if slot.is_some() {
        return Err(ParseFailure::ConflictingOutcomes);
    }
    *slot = Some(answer);
    Ok(())
}

/// First load-time error found in engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostic {
    pub line: Option<u32>,
    pub message: String,
}

/// Scan output captured while a program loaded for an error report.
pub fn compile_diagnostic<S: AsRef<str>>(output: &[S]) -> Option<CompileDiagnostic> {
    output
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| !l.starts_with("@@") && !l.starts_with("% Warning"))
        .find(|l| ERROR_REPORT.is_match(l))
        .map(|l| {
            let line = DIAGNOSTIC_LINE.captures(l).and_then(|c| {
                c.get(1)
                    .or_else(|| c.get(2))
                    .and_then(|m| m.as_str().parse().ok())
            });
            CompileDiagnostic {
                line,
                message: l.to_string(),
            }
        })
}
