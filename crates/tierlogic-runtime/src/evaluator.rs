//! Decision evaluator: the `evaluate(facts, rules)` entry point.
//!
//! Each request runs its own pipeline:
//!
//! ```text
//! facts ─► encode ─► open session ─► cascade ─► classifications ─► assemble
//!                         │                                           │
//!                         └──────────── close (every exit path) ◄─────┘
//! ```
//!
//! The cascade is driven from here, one query at a time, so tier exclusivity
//! never depends on how the engine orders its own clauses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;

use tierlogic_core::{
    assemble, encode, ApplicantFacts, Cascade, Classification, DecisionRecord, FactSchema, Goal,
    RuleSet,
};

use crate::backend::SolverBackend;
use crate::cache::{CacheKey, DecisionCache};
use crate::config::EvaluatorConfig;
use crate::error::DecisionError;
use crate::scryer::ScryerBackend;
use crate::session::{SessionOptions, SolverSession};

/// Variable used for classification lookups.
const VALUE_VAR: &str = "Value";

/// Rule set name for text passed to [`DecisionEvaluator::evaluate_json`].
const INLINE_RULE_SET: &str = "inline";

/// How one evaluation went.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    /// Session used, if one was opened
    pub session_id: Option<u64>,

    /// Solver queries submitted
    pub queries: u32,

    /// Whether the decision came from the cache
    pub cache_hit: bool,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl EvaluationReport {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Running totals across all evaluations of one evaluator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluatorStats {
    pub evaluations: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub sessions_opened: u64,
    pub queries: u64,
}

/// Evaluates applicant facts against rule sets using an external engine.
///
/// Cheap to share behind an `Arc`; every call gets its own session.
pub struct DecisionEvaluator {
    backend: Arc<dyn SolverBackend>,
    config: EvaluatorConfig,
    schema: Arc<FactSchema>,
    sessions: Semaphore,
    cache: Option<DecisionCache>,
    stats: RwLock<EvaluatorStats>,
}

impl DecisionEvaluator {
    /// Create an evaluator over any backend.
    pub fn new(
        backend: Arc<dyn SolverBackend>,
        config: EvaluatorConfig,
    ) -> Result<Self, DecisionError> {
        config.validate()?;

        Ok(Self {
            backend,
            sessions: Semaphore::new(config.max_concurrent_sessions),
            cache: config.cache.as_ref().map(DecisionCache::from_config),
            schema: Arc::new(FactSchema::loan_application()),
            stats: RwLock::new(EvaluatorStats::default()),
            config,
        })
    }

    /// Create an evaluator over a discovered Scryer Prolog.
    pub async fn scryer(config: EvaluatorConfig) -> Result<Self, DecisionError> {
        let backend = ScryerBackend::discover(&config.solver)
            .await
            .map_err(|e| DecisionError::EngineUnavailable(e.to_string()))?;
        Self::new(Arc::new(backend), config)
    }

    /// Use a different fact schema for `evaluate_json`.
    pub fn with_schema(mut self, schema: Arc<FactSchema>) -> Self {
        self.schema = schema;
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn schema(&self) -> &FactSchema {
        &self.schema
    }

    pub fn stats(&self) -> EvaluatorStats {
        self.stats.read().clone()
    }

    /// Sessions that could be opened right now without waiting.
    pub fn available_sessions(&self) -> usize {
        self.sessions.available_permits()
    }

    /// Evaluate facts against a rule set.
    pub async fn evaluate(
        &self,
        facts: &ApplicantFacts,
        rule_set: &RuleSet,
    ) -> Result<DecisionRecord, DecisionError> {
        let (record, _) = self.evaluate_with_report(facts, rule_set).await?;
        Ok(record)
    }

    /// Validate a raw record and rule text, then evaluate.
    pub async fn evaluate_json(
        &self,
        record: &Value,
        rule_set_text: &str,
    ) -> Result<DecisionRecord, DecisionError> {
        let facts = ApplicantFacts::from_json_for(&self.config.subject, record, &self.schema)?;
        let rule_set = RuleSet::new(INLINE_RULE_SET, rule_set_text)?;
        self.evaluate(&facts, &rule_set).await
    }

    /// Evaluate and report how the decision was reached.
    pub async fn evaluate_with_report(
        &self,
        facts: &ApplicantFacts,
        rule_set: &RuleSet,
    ) -> Result<(DecisionRecord, EvaluationReport), DecisionError> {
        let started_at = Utc::now();
        let result = self.run(facts, rule_set, started_at).await;

        let mut stats = self.stats.write();
        stats.evaluations += 1;
        match &result {
            Ok((_, report)) => {
                stats.queries += u64::from(report.queries);
                if report.cache_hit {
                    stats.cache_hits += 1;
                }
                if report.session_id.is_some() {
                    stats.sessions_opened += 1;
                }
            }
            Err(_) => stats.failures += 1,
        }

        result
    }

    async fn run(
        &self,
        facts: &ApplicantFacts,
        rule_set: &RuleSet,
        started_at: DateTime<Utc>,
    ) -> Result<(DecisionRecord, EvaluationReport), DecisionError> {
        let encoded = encode(facts)?;
        let key = CacheKey::new(rule_set, &encoded);

        if let Some(cache) = &self.cache {
            if let Some(mut record) = cache.get(&key).await {
                // The key is content identity; name and version are the caller's
                record.rule_set = rule_set.reference();
                tracing::debug!(rule_set = %rule_set.name(), tier = %record.tier, "Decision served from cache");
                let report = EvaluationReport {
                    session_id: None,
                    queries: 0,
                    cache_hit: true,
                    started_at,
                    finished_at: Utc::now(),
                };
                return Ok((record, report));
            }
        }

        let _permit = self
            .sessions
            .acquire()
            .await
            .map_err(|_| DecisionError::EngineUnavailable("session limiter closed".to_string()))?;

        let mut session = SolverSession::open(
            self.backend.as_ref(),
            rule_set,
            &encoded,
            SessionOptions::from(&self.config),
        )
        .await?;

        let outcome = self.decide(&mut session, facts, rule_set).await;
        session.close().await;

        let record = match outcome {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    session_id = session.id(),
                    rule_set = %rule_set.name(),
                    error = %e,
                    "Evaluation aborted"
                );
                return Err(e);
            }
        };

        tracing::info!(
            session_id = session.id(),
            rule_set = %rule_set.name(),
            tier = %record.tier,
            queries = session.queries(),
            "Decision reached"
        );

        if let Some(cache) = &self.cache {
            cache.insert(key, record.clone()).await;
        }

        let report = EvaluationReport {
            session_id: Some(session.id()),
            queries: session.queries(),
            cache_hit: false,
            started_at,
            finished_at: Utc::now(),
        };
        Ok((record, report))
    }

    /// Cascade, then classifications, on an open session.
    async fn decide(
        &self,
        session: &mut SolverSession,
        facts: &ApplicantFacts,
        rule_set: &RuleSet,
    ) -> Result<DecisionRecord, DecisionError> {
        let subject = facts.subject();
        let deadline = self.config.query_timeout;

        let mut cascade = Cascade::new();
        while let Some(predicate) = cascade.next_query() {
            let holds = session
                .holds(&Goal::holds(predicate.name(), subject), deadline)
                .await?;
            cascade
                .record(predicate, holds)
                .map_err(|e| DecisionError::ResolutionAborted {
                    predicate: predicate.name().to_string(),
                    reason: e.to_string(),
                })?;
        }

        let resolution = cascade
            .resolve()
            .map_err(|e| DecisionError::ResolutionAborted {
                predicate: "cascade".to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            session_id = session.id(),
            tier = %resolution.tier,
            fired = ?resolution.fired,
            "Tier resolved"
        );

        let mut classifications = Vec::new();
        if self.config.collect_classifications {
            for predicate in rule_set.classifications() {
                let goal = Goal::lookup(predicate.as_str(), subject, VALUE_VAR);
                if let Some(value) = session.lookup(&goal, deadline).await? {
                    classifications.push(Classification {
                        predicate: predicate.clone(),
                        value,
                    });
                }
            }
        }

        Ok(assemble(resolution, facts, rule_set, classifications))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::CacheConfig;
    use crate::testing::{scenario_record, ScriptedBackend};
    use tierlogic_core::{DecisionPredicate, EngineErrorKind, RiskCategory, Term, Tier};

    fn evaluator(backend: &ScriptedBackend, config: EvaluatorConfig) -> DecisionEvaluator {
        DecisionEvaluator::new(Arc::new(backend.clone()), config).unwrap()
    }

    fn scenario_facts() -> ApplicantFacts {
        ApplicantFacts::from_json(&scenario_record(), &FactSchema::loan_application()).unwrap()
    }

    #[tokio::test]
    async fn test_standard_approval_with_classifications() {
        let backend = ScriptedBackend::new()
            .holding("standard_approve")
            .holding("conditional_approve")
            .binding("credit_tier", "good")
            .binding("debt_ratio_tier", "low");
        let evaluator = evaluator(&backend, EvaluatorConfig::default());
        let rules = RuleSet::loan_default().unwrap();

        let (record, report) = evaluator
            .evaluate_with_report(&scenario_facts(), &rules)
            .await
            .unwrap();

        assert_eq!(record.tier, Tier::StandardApproved);
        assert_eq!(record.risk, RiskCategory::Medium);
        assert_eq!(record.rate_premium.basis_points(), 50);
        assert_eq!(record.fired, vec![DecisionPredicate::StandardApprove]);
        assert_eq!(record.classification("credit_tier"), Some(&Term::Atom("good".into())));
        assert_eq!(record.classification("debt_ratio_tier"), Some(&Term::Atom("low".into())));
        assert_eq!(record.classifications.len(), 2);

        // auto_reject, auto_approve, standard_approve, then eight lookups
        assert_eq!(report.queries, 3 + 8);
        assert!(!report.cache_hit);
        assert!(report.finished_at >= report.started_at);

        let submitted = backend.submitted();
        assert_eq!(
            &submitted[..3],
            &[
                "auto_reject(applicant)".to_string(),
                "auto_approve(applicant)".to_string(),
                "standard_approve(applicant)".to_string(),
            ]
        );
        // conditional_approve is settled by approval and never asked
        assert!(!submitted.contains(&"conditional_approve(applicant)".to_string()));

        assert_eq!(backend.shutdowns(), 1);
        assert_eq!(backend.live(), 0);
    }

    #[tokio::test]
    async fn test_auto_reject_vetoes_approval() {
        let backend = ScriptedBackend::new()
            .holding("auto_reject")
            .holding("auto_approve");
        let evaluator = evaluator(
            &backend,
            EvaluatorConfig::default().with_classifications(false),
        );
        let rules = RuleSet::loan_default().unwrap();

        let record = evaluator.evaluate(&scenario_facts(), &rules).await.unwrap();

        assert_eq!(record.tier, Tier::Rejected);
        assert_eq!(record.risk, RiskCategory::High);
        assert_eq!(record.rate_premium.basis_points(), 9999);
        assert_eq!(record.fired, vec![DecisionPredicate::AutoReject]);
        assert!(record.classifications.is_empty());
        assert_eq!(backend.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_holds_is_rejected() {
        let backend = ScriptedBackend::new();
        let evaluator = evaluator(
            &backend,
            EvaluatorConfig::default().with_classifications(false),
        );
        let rules = RuleSet::loan_default().unwrap();

        let record = evaluator.evaluate(&scenario_facts(), &rules).await.unwrap();
        assert_eq!(record.tier, Tier::Rejected);
        assert!(record.fired.is_empty());
        assert_eq!(backend.submitted().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_without_record_and_closes() {
        let backend = ScriptedBackend::new()
            .holding("manual_review")
            .delaying("standard_approve", Duration::from_secs(60));
        let config = EvaluatorConfig::default().with_query_timeout(Duration::from_millis(100));
        let evaluator = evaluator(&backend, config);
        let rules = RuleSet::loan_default().unwrap();

        let err = evaluator
            .evaluate(&scenario_facts(), &rules)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DecisionError::QueryTimeout { ref goal, .. } if goal == "standard_approve(applicant)"
        ));
        // Nothing after the timed-out goal was asked
        assert_eq!(backend.submitted().len(), 3);
        assert_eq!(backend.aborts(), 1);
        assert_eq!(backend.live(), 0);
        assert_eq!(evaluator.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_engine_error_aborts_cascade() {
        let backend = ScriptedBackend::new().failing(
            "auto_approve",
            "error(type_error(evaluable,foo/0),(is)/2)",
        );
        let evaluator = evaluator(&backend, EvaluatorConfig::default());
        let rules = RuleSet::loan_default().unwrap();

        let err = evaluator
            .evaluate(&scenario_facts(), &rules)
            .await
            .unwrap_err();

        match err {
            DecisionError::Engine { goal, error } => {
                assert_eq!(goal, "auto_approve(applicant)");
                assert_eq!(error.kind, EngineErrorKind::Type);
            }
            other => panic!("expected Engine, got {:?}", other),
        }
        assert_eq!(backend.shutdowns(), 1);
        assert_eq!(backend.live(), 0);
    }

    #[tokio::test]
    async fn test_classification_error_aborts() {
        let backend = ScriptedBackend::new()
            .holding("auto_approve")
            .failing("income_tier", "error(instantiation_error,(>=)/2)");
        let evaluator = evaluator(&backend, EvaluatorConfig::default());
        let rules = RuleSet::loan_default().unwrap();

        let err = evaluator
            .evaluate(&scenario_facts(), &rules)
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::Engine { ref goal, .. } if goal.starts_with("income_tier(")));
    }

    #[tokio::test]
    async fn test_compile_error_surfaces() {
        let backend = ScriptedBackend::new().rejecting_program(Some(7), "syntax error");
        let evaluator = evaluator(&backend, EvaluatorConfig::default());
        let rules = RuleSet::loan_default().unwrap();

        let err = evaluator
            .evaluate(&scenario_facts(), &rules)
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::RuleCompile { line: Some(7), .. }));
        // The permit is released with the failed open
        assert_eq!(evaluator.available_sessions(), 4);
    }

    #[tokio::test]
    async fn test_evaluation_is_idempotent() {
        let backend = ScriptedBackend::new()
            .holding("manual_review")
            .binding("credit_tier", "fair");
        let evaluator = evaluator(&backend, EvaluatorConfig::default());
        let rules = RuleSet::loan_default().unwrap();

        let first = evaluator.evaluate(&scenario_facts(), &rules).await.unwrap();
        let second = evaluator.evaluate(&scenario_facts(), &rules).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.tier, Tier::NeedsReview);
        assert_eq!(first.rate_premium.basis_points(), 300);
        // Without a cache every evaluation gets a fresh engine
        assert_eq!(backend.launches(), 2);
    }

    #[tokio::test]
    async fn test_cache_skips_engine() {
        let backend = ScriptedBackend::new().holding("auto_approve");
        let config = EvaluatorConfig::default().with_cache(CacheConfig::default());
        let evaluator = evaluator(&backend, config);
        let rules = RuleSet::loan_default().unwrap();

        let (first, report) = evaluator
            .evaluate_with_report(&scenario_facts(), &rules)
            .await
            .unwrap();
        assert!(!report.cache_hit);

        let (second, report) = evaluator
            .evaluate_with_report(&scenario_facts(), &rules)
            .await
            .unwrap();
        assert!(report.cache_hit);
        assert_eq!(report.queries, 0);
        assert_eq!(first, second);
        assert_eq!(backend.launches(), 1);

        let stats = evaluator.stats();
        assert_eq!(stats.evaluations, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.sessions_opened, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_names_requested_rule_set() {
        let backend = ScriptedBackend::new().holding("auto_approve");
        let config = EvaluatorConfig::default().with_cache(CacheConfig::default());
        let evaluator = evaluator(&backend, config);

        let text = RuleSet::loan_default().unwrap().program_text().to_string();
        let v1 = RuleSet::new("loan_v1", &text).unwrap().with_version("1");
        let v2 = RuleSet::new("loan_v2", &text).unwrap().with_version("2");
        assert_eq!(v1.id(), v2.id());

        let first = evaluator.evaluate(&scenario_facts(), &v1).await.unwrap();
        let (second, report) = evaluator
            .evaluate_with_report(&scenario_facts(), &v2)
            .await
            .unwrap();

        assert!(report.cache_hit);
        assert_eq!(backend.launches(), 1);
        assert_eq!(first.rule_set, v1.reference());
        assert_eq!(second.rule_set, v2.reference());
        assert_eq!(second.tier, first.tier);
    }

    #[tokio::test]
    async fn test_evaluate_json_contract() {
        let backend = ScriptedBackend::new().holding("conditional_approve");
        let evaluator = evaluator(
            &backend,
            EvaluatorConfig::default().with_classifications(false),
        );
        let rules_text = RuleSet::loan_default().unwrap().program_text().to_string();

        let record = evaluator
            .evaluate_json(&scenario_record(), &rules_text)
            .await
            .unwrap();
        assert_eq!(record.tier, Tier::ConditionallyApproved);
        assert_eq!(record.rate_premium.basis_points(), 150);
        assert_eq!(record.rule_set.name, "inline");
    }

    #[tokio::test]
    async fn test_evaluate_json_rejects_bad_facts_before_launch() {
        let backend = ScriptedBackend::new();
        let evaluator = evaluator(&backend, EvaluatorConfig::default());
        let mut record = scenario_record();
        record.as_object_mut().unwrap().remove("debtRatio");

        let err = evaluator
            .evaluate_json(&record, RuleSet::loan_default().unwrap().program_text())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DecisionError::Schema(tierlogic_core::SchemaError::MissingKey { ref key }) if key == "debtRatio"
        ));
        assert_eq!(backend.launches(), 0);
    }

    #[tokio::test]
    async fn test_evaluate_json_rejects_incomplete_rules() {
        let backend = ScriptedBackend::new();
        let evaluator = evaluator(&backend, EvaluatorConfig::default());

        let err = evaluator
            .evaluate_json(&scenario_record(), "auto_approve(_) :- fail.\n")
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::RuleSet(_)));
        assert_eq!(backend.launches(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_get_own_sessions() {
        let backend = ScriptedBackend::new()
            .holding("standard_approve")
            .delaying("auto_reject", Duration::from_millis(20));
        let config = EvaluatorConfig::default()
            .with_max_concurrent_sessions(2)
            .with_classifications(false);
        let evaluator = Arc::new(evaluator(&backend, config));
        let rules = Arc::new(RuleSet::loan_default().unwrap());

        let mut handles = Vec::new();
        for _ in 0..6 {
            let evaluator = evaluator.clone();
            let rules = rules.clone();
            handles.push(tokio::spawn(async move {
                evaluator.evaluate(&scenario_facts(), &rules).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().tier, Tier::StandardApproved);
        }

        assert_eq!(backend.launches(), 6);
        assert!(backend.peak_live() <= 2);
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let backend = ScriptedBackend::new();
        let result = DecisionEvaluator::new(
            Arc::new(backend),
            EvaluatorConfig::default().with_max_concurrent_sessions(0),
        );
        assert!(matches!(result, Err(DecisionError::Config(_))));
    }

    #[tokio::test]
    async fn test_dropped_request_leaves_no_engine() {
        let backend = ScriptedBackend::new().delaying("auto_reject", Duration::from_secs(60));
        let evaluator = evaluator(&backend, EvaluatorConfig::default());
        let rules = RuleSet::loan_default().unwrap();
        let facts = scenario_facts();

        let pending = evaluator.evaluate(&facts, &rules);
        let _ = tokio::time::timeout(Duration::from_millis(20), pending).await;

        assert_eq!(backend.launches(), 1);
        assert_eq!(backend.live(), 0);
    }
}
