//! Scripted in-process backend for session and evaluator tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tierlogic_core::{Goal, RawResult};

use crate::backend::{SolverBackend, SolverConnection, SolverError};

/// Literal scenario 1: good credit, clean history, moderate debt.
pub(crate) fn scenario_record() -> Value {
    json!({
        "age": 35,
        "income": 75000,
        "creditScore": 720,
        "employmentStatus": "permanent",
        "employmentYears": 5,
        "debtRatio": 0.25,
        "loanAmount": 250000,
        "loanPurpose": "mortgage",
        "propertyValue": 300000,
        "savings": 50000,
        "investments": 25000,
        "latePayments": 1,
        "bankruptcies": 0,
        "defaults": 0
    })
}

#[derive(Default)]
struct Script {
    holding: BTreeSet<String>,
    bindings: BTreeMap<String, String>,
    failures: BTreeMap<String, String>,
    delays: BTreeMap<String, Duration>,
    garbled: BTreeSet<String>,
    compile_error: Option<(Option<u32>, String)>,
    unavailable: Option<String>,
    start_delay: Option<Duration>,
}

#[derive(Default)]
struct Counters {
    launches: AtomicUsize,
    shutdowns: AtomicUsize,
    aborts: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,
    programs: Mutex<Vec<String>>,
    submitted: Mutex<Vec<String>>,
}

/// Answers goals from a fixed script instead of running an engine.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBackend {
    script: Arc<Script>,
    counters: Arc<Counters>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn edit(mut self, f: impl FnOnce(&mut Script)) -> Self {
        // Builders run before any launch, so the script is never shared yet.
        if let Some(script) = Arc::get_mut(&mut self.script) {
            f(script);
        }
        self
    }

    /// `predicate(subject)` succeeds.
    pub(crate) fn holding(self, predicate: &str) -> Self {
        let predicate = predicate.to_string();
        self.edit(|s| {
            s.holding.insert(predicate);
        })
    }

    /// `predicate(subject, Var)` binds `Var` to `term`.
    pub(crate) fn binding(self, predicate: &str, term: &str) -> Self {
        let (predicate, term) = (predicate.to_string(), term.to_string());
        self.edit(|s| {
            s.bindings.insert(predicate, term);
        })
    }

    /// The engine throws `term` for this predicate.
    pub(crate) fn failing(self, predicate: &str, term: &str) -> Self {
        let (predicate, term) = (predicate.to_string(), term.to_string());
        self.edit(|s| {
            s.failures.insert(predicate, term);
        })
    }

    pub(crate) fn delaying(self, predicate: &str, delay: Duration) -> Self {
        let predicate = predicate.to_string();
        self.edit(|s| {
            s.delays.insert(predicate, delay);
        })
    }

    /// Output for this predicate stops before the end marker.
    pub(crate) fn garbling(self, predicate: &str) -> Self {
        let predicate = predicate.to_string();
        self.edit(|s| {
            s.garbled.insert(predicate);
        })
    }

    pub(crate) fn rejecting_program(self, line: Option<u32>, message: &str) -> Self {
        let message = message.to_string();
        self.edit(|s| s.compile_error = Some((line, message)))
    }

    pub(crate) fn unavailable(self, reason: &str) -> Self {
        let reason = reason.to_string();
        self.edit(|s| s.unavailable = Some(reason))
    }

    pub(crate) fn slow_start(self, delay: Duration) -> Self {
        self.edit(|s| s.start_delay = Some(delay))
    }

    pub(crate) fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.counters.shutdowns.load(Ordering::SeqCst)
    }

    pub(crate) fn aborts(&self) -> usize {
        self.counters.aborts.load(Ordering::SeqCst)
    }

    /// Connections neither shut down nor aborted.
    pub(crate) fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_live(&self) -> usize {
        self.counters.peak_live.load(Ordering::SeqCst)
    }

    pub(crate) fn programs(&self) -> Vec<String> {
        self.counters.programs.lock().clone()
    }

    /// Every goal submitted, across all connections, in order.
    pub(crate) fn submitted(&self) -> Vec<String> {
        self.counters.submitted.lock().clone()
    }
}

#[async_trait]
impl SolverBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn launch(&self, program: &str) -> Result<Box<dyn SolverConnection>, SolverError> {
        if let Some(delay) = self.script.start_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.script.unavailable {
            return Err(SolverError::Launch(reason.clone()));
        }
        if let Some((line, message)) = &self.script.compile_error {
            return Err(SolverError::Compile {
                line: *line,
                message: message.clone(),
            });
        }

        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        self.counters.programs.lock().push(program.to_string());
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(ScriptedConnection {
            script: self.script.clone(),
            counters: self.counters.clone(),
            finished: false,
        }))
    }
}

struct ScriptedConnection {
    script: Arc<Script>,
    counters: Arc<Counters>,
    finished: bool,
}

impl ScriptedConnection {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn lines(lines: &[&str]) -> RawResult {
    RawResult::new(lines.iter().map(|l| l.to_string()).collect())
}

#[async_trait]
impl SolverConnection for ScriptedConnection {
    async fn submit(&mut self, goal: &Goal) -> Result<RawResult, SolverError> {
        self.counters.submitted.lock().push(goal.to_string());
        let predicate = goal.predicate.as_str();

        if let Some(delay) = self.script.delays.get(predicate) {
            tokio::time::sleep(*delay).await;
        }
        if self.script.garbled.contains(predicate) {
            return Ok(lines(&["@@SOLUTION"]));
        }
        if let Some(term) = self.script.failures.get(predicate) {
            let error = format!("@@ERROR {}", term);
            return Ok(lines(&[error.as_str(), "@@END"]));
        }

        match goal.variables().next() {
            Some(var) => match self.script.bindings.get(predicate) {
                Some(term) => {
                    let bind = format!("@@BIND {}={}", var, term);
                    Ok(lines(&["@@SOLUTION", bind.as_str(), "@@END"]))
                }
                None => Ok(lines(&["@@NO_SOLUTION", "@@END"])),
            },
            None if self.script.holding.contains(predicate) => {
                Ok(lines(&["@@SOLUTION", "@@END"]))
            }
            None => Ok(lines(&["@@NO_SOLUTION", "@@END"])),
        }
    }

    async fn shutdown(&mut self, _grace: Duration) {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.finish();
    }

    fn abort(&mut self) {
        self.counters.aborts.fetch_add(1, Ordering::SeqCst);
        self.finish();
    }
}
