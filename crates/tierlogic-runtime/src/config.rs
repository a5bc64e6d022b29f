//! Evaluator configuration.
//!
//! Durations are written the human way (`"10s"`, `"250ms"`, `"1h 30m"`).
//!
//! ```yaml
//! query_timeout: 2s
//! max_concurrent_sessions: 8
//! cache:
//!   max_entries: 5000
//!   ttl: 15m
//! solver:
//!   executable: /opt/scryer/bin/scryer-prolog
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tierlogic_core::DEFAULT_SUBJECT;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("max_concurrent_sessions must be at least 1")]
    ZeroConcurrency,

    #[error("cache.max_entries must be at least 1")]
    ZeroCacheCapacity,

    #[error("Subject '{0}' is not a plain atom")]
    InvalidSubject(String),
}

/// Configuration for [`DecisionEvaluator`](crate::DecisionEvaluator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Deadline for each individual query
    #[serde(with = "humantime_duration")]
    pub query_timeout: Duration,

    /// Deadline for launching the engine and loading the program
    #[serde(with = "humantime_duration")]
    pub open_timeout: Duration,

    /// How long a closing engine may take to exit before it is killed
    #[serde(with = "humantime_duration")]
    pub shutdown_grace: Duration,

    /// Upper bound on simultaneously open sessions
    pub max_concurrent_sessions: usize,

    /// Subject atom for records evaluated through `evaluate_json`
    pub subject: String,

    /// Query classification predicates after the tier is fixed
    pub collect_classifications: bool,

    /// Decision cache; disabled when absent
    pub cache: Option<CacheConfig>,

    pub solver: SolverConfig,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(10),
            open_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(1),
            max_concurrent_sessions: 4,
            subject: DEFAULT_SUBJECT.to_string(),
            collect_classifications: true,
            cache: None,
            solver: SolverConfig::default(),
        }
    }
}

impl EvaluatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_sessions(mut self, max: usize) -> Self {
        self.max_concurrent_sessions = max;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_classifications(mut self, enabled: bool) -> Self {
        self.collect_classifications = enabled;
        self
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("query_timeout"));
        }
        if self.open_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("open_timeout"));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if !tierlogic_core::encoder::is_plain_atom(&self.subject) {
            return Err(ConfigError::InvalidSubject(self.subject.clone()));
        }
        if let Some(cache) = &self.cache {
            if cache.max_entries == 0 {
                return Err(ConfigError::ZeroCacheCapacity);
            }
            if cache.ttl.is_zero() {
                return Err(ConfigError::ZeroDuration("cache.ttl"));
            }
        }
        Ok(())
    }
}

/// Decision cache sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: u64,

    #[serde(with = "humantime_duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// How to start the external engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Explicit executable; discovered from well-known locations when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,

    /// Extra arguments placed before the program file
    pub args: Vec<String>,
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
