//! Solver session manager.
//!
//! A session owns exactly one engine instance with one rule set and one
//! request's facts loaded. Lifecycle:
//!
//! ```text
//! open ──► Ready ──query──► Ready
//!            │  timeout / protocol failure
//!            ▼
//!         Defunct ──close──► Closed
//! ```
//!
//! A defunct session refuses further queries; the caller closes it and, to
//! retry, opens a fresh one. `close` is idempotent and `Drop` kills any
//! engine still attached, so no exit path leaves a process behind.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;

use tierlogic_core::{
    parse_for, Answer, EncodedFacts, Goal, RawResult, RuleSet, RuleSetId, Term,
};

use crate::backend::{SolverBackend, SolverConnection, SolverError};
use crate::config::EvaluatorConfig;
use crate::error::DecisionError;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Ready,
    /// A query failed mid-flight; engine state can no longer be trusted
    Defunct,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Ready => f.write_str("ready"),
            SessionState::Defunct => f.write_str("defunct"),
            SessionState::Closed => f.write_str("closed"),
        }
    }
}

/// Timing options for a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub open_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&EvaluatorConfig::default())
    }
}

impl From<&EvaluatorConfig> for SessionOptions {
    fn from(config: &EvaluatorConfig) -> Self {
        Self {
            open_timeout: config.open_timeout,
            shutdown_grace: config.shutdown_grace,
        }
    }
}

/// Program text for one request: the rules followed by its facts.
pub fn request_program(rule_set: &RuleSet, facts: &EncodedFacts) -> String {
    format!(
        "{}\n% facts for this request\n{}",
        rule_set.program_text(),
        facts.text()
    )
}

/// A live, exclusively owned engine session.
pub struct SolverSession {
    id: u64,
    rule_set_name: String,
    rule_set_id: RuleSetId,
    connection: Option<Box<dyn SolverConnection>>,
    state: SessionState,
    shutdown_grace: Duration,
    queries: u32,
}

impl SolverSession {
    /// Start an engine and load the rule set plus this request's facts.
    pub async fn open(
        backend: &dyn SolverBackend,
        rule_set: &RuleSet,
        facts: &EncodedFacts,
        options: SessionOptions,
    ) -> Result<Self, DecisionError> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let program = request_program(rule_set, facts);

        let connection = match timeout(options.open_timeout, backend.launch(&program)).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(SolverError::Compile { line, message })) => {
                tracing::warn!(
                    session_id = id,
                    rule_set = %rule_set.name(),
                    line = ?line,
                    message = %message,
                    "Rule set failed to load"
                );
                return Err(DecisionError::RuleCompile {
                    rule_set: rule_set.name().to_string(),
                    line,
                    message,
                });
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id = id, backend = backend.name(), error = %e, "Engine failed to start");
                return Err(DecisionError::EngineUnavailable(format!(
                    "{}: {}",
                    backend.name(),
                    e
                )));
            }
            Err(_) => {
                tracing::warn!(
                    session_id = id,
                    backend = backend.name(),
                    timeout = ?options.open_timeout,
                    "Engine was not ready in time"
                );
                return Err(DecisionError::EngineUnavailable(format!(
                    "{} was not ready within {:?}",
                    backend.name(),
                    options.open_timeout
                )));
            }
        };

        tracing::info!(
            session_id = id,
            rule_set = %rule_set.name(),
            rule_set_id = %rule_set.id(),
            backend = backend.name(),
            "Solver session opened"
        );

        Ok(Self {
            id,
            rule_set_name: rule_set.name().to_string(),
            rule_set_id: rule_set.id(),
            connection: Some(connection),
            state: SessionState::Ready,
            shutdown_grace: options.shutdown_grace,
            queries: 0,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identity of the rule set loaded in this session.
    pub fn rule_set_id(&self) -> RuleSetId {
        self.rule_set_id
    }

    /// Queries submitted so far, including failed ones.
    pub fn queries(&self) -> u32 {
        self.queries
    }

    /// Submit one goal and return the engine's raw marker output.
    ///
    /// On deadline elapse the engine is killed and the session becomes
    /// defunct before `QueryTimeout` is returned.
    pub async fn query_raw(
        &mut self,
        goal: &Goal,
        deadline: Duration,
    ) -> Result<RawResult, DecisionError> {
        if self.state != SessionState::Ready {
            return Err(DecisionError::SessionUnusable { state: self.state });
        }
        let Some(connection) = self.connection.as_mut() else {
            return Err(DecisionError::SessionUnusable { state: self.state });
        };

        self.queries += 1;
        let started = Instant::now();

        match timeout(deadline, connection.submit(goal)).await {
            Ok(Ok(raw)) => {
                tracing::debug!(
                    session_id = self.id,
                    goal = %goal,
                    elapsed = ?started.elapsed(),
                    "Query answered"
                );
                Ok(raw)
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                self.mark_defunct(&reason);
                Err(DecisionError::ResolutionAborted {
                    predicate: goal.predicate.clone(),
                    reason,
                })
            }
            Err(_) => {
                tracing::warn!(
                    session_id = self.id,
                    goal = %goal,
                    deadline = ?deadline,
                    "Query timed out"
                );
                self.mark_defunct("query deadline elapsed");
                Err(DecisionError::QueryTimeout {
                    goal: goal.to_string(),
                    deadline,
                })
            }
        }
    }

    /// Submit one goal and parse the answer.
    ///
    /// Engine-reported faults come back as `Answer::Error` and leave the
    /// session usable. Output that breaks the protocol makes it defunct.
    pub async fn query(&mut self, goal: &Goal, deadline: Duration) -> Result<Answer, DecisionError> {
        if !goal.is_well_formed() {
            return Err(DecisionError::ResolutionAborted {
                predicate: goal.predicate.clone(),
                reason: format!("malformed goal '{}'", goal),
            });
        }

        let raw = self.query_raw(goal, deadline).await?;
        match parse_for(goal, &raw) {
            Ok(answer) => {
                if let Answer::Error(error) = &answer {
                    tracing::warn!(
                        session_id = self.id,
                        goal = %goal,
                        kind = ?error.kind,
                        term = %error.term,
                        "Engine reported an error"
                    );
                }
                Ok(answer)
            }
            Err(failure) => {
                let reason = failure.to_string();
                self.mark_defunct(&reason);
                Err(DecisionError::ResolutionAborted {
                    predicate: goal.predicate.clone(),
                    reason,
                })
            }
        }
    }

    /// Does the goal succeed? Engine errors are returned as `Engine`.
    pub async fn holds(&mut self, goal: &Goal, deadline: Duration) -> Result<bool, DecisionError> {
        match self.query(goal, deadline).await? {
            Answer::Solution(_) => Ok(true),
            Answer::NoSolution => Ok(false),
            Answer::Error(error) => Err(DecisionError::Engine {
                goal: goal.to_string(),
                error,
            }),
        }
    }

    /// Binding of the goal's first variable, or `None` on no solution.
    pub async fn lookup(
        &mut self,
        goal: &Goal,
        deadline: Duration,
    ) -> Result<Option<Term>, DecisionError> {
        match self.query(goal, deadline).await? {
            Answer::Solution(binding) => Ok(goal
                .variables()
                .next()
                .and_then(|var| binding.get(var))
                .cloned()),
            Answer::NoSolution => Ok(None),
            Answer::Error(error) => Err(DecisionError::Engine {
                goal: goal.to_string(),
                error,
            }),
        }
    }

    /// Release the engine. Safe to call any number of times.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(mut connection) = self.connection.take() {
            connection.shutdown(self.shutdown_grace).await;
        }

        tracing::debug!(
            session_id = self.id,
            rule_set = %self.rule_set_name,
            queries = self.queries,
            previous = %self.state,
            "Solver session closed"
        );
        self.state = SessionState::Closed;
    }

    fn mark_defunct(&mut self, reason: &str) {
        tracing::warn!(session_id = self.id, reason = %reason, "Solver session defunct");
        if let Some(mut connection) = self.connection.take() {
            connection.abort();
        }
        self.state = SessionState::Defunct;
    }
}

impl Drop for SolverSession {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            tracing::debug!(session_id = self.id, "Aborting engine of dropped session");
            connection.abort();
        }
    }
}

impl fmt::Debug for SolverSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverSession")
            .field("id", &self.id)
            .field("rule_set", &self.rule_set_name)
            .field("state", &self.state)
            .field("queries", &self.queries)
            .finish()
    }
}
