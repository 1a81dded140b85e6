//! Engine configuration.
//!
//! Loaded once at startup (defaults + env overrides), validated, then passed
//! by reference into each component. No component reads env vars after init.

use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::router::Thresholds;

/// Full engine configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub thresholds: Thresholds,
    pub batch: BatchConfig,
    pub resilience: ResilienceConfig,
    pub escalation: EscalationConfig,
}

/// Batch coordinator settings.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Worker pool size for concurrent message processing.
    pub concurrency: usize,
    /// Upper bound on total cycle duration. Workers still in flight when
    /// this fires are abandoned; their messages re-poll next cycle.
    pub cycle_timeout: Duration,
    /// Whether a message whose processing failed is still marked seen.
    /// When false, failed messages are re-fetched every cycle.
    pub mark_failed_as_seen: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            cycle_timeout: Duration::from_secs(300),
            mark_failed_as_seen: true,
        }
    }
}

/// Retry and circuit-breaker settings shared by all external call sites.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Maximum retries after the initial attempt (transient errors only).
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub backoff_base: Duration,
    /// Cap on any single backoff delay.
    pub max_backoff: Duration,
    /// Consecutive failures before a dependency's breaker opens.
    pub breaker_failure_threshold: u32,
    /// How long an open breaker short-circuits calls before a trial.
    pub breaker_cooldown: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

/// Escalation group settings.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Minimum member count for an escalation group.
    pub min_group_size: usize,
    /// Responder injected when expertise matching comes up short.
    pub fallback_responder: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            min_group_size: 2,
            fallback_responder: "oncall@example.com".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            batch: BatchConfig::default(),
            resilience: ResilienceConfig::default(),
            escalation: EscalationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build config from defaults with environment overrides, then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse_env::<f64>("TRIAGE_AUTO_HANDLE")? {
            config.thresholds.auto_handle = v;
        }
        if let Some(v) = parse_env::<f64>("TRIAGE_SUGGEST_RESPONSE")? {
            config.thresholds.suggest_response = v;
        }
        if let Some(v) = parse_env::<f64>("TRIAGE_HUMAN_REVIEW")? {
            config.thresholds.human_review = v;
        }
        if let Some(v) = parse_env::<usize>("TRIAGE_CONCURRENCY")? {
            config.batch.concurrency = v;
        }
        if let Some(v) = parse_env::<u64>("TRIAGE_CYCLE_TIMEOUT_SECS")? {
            config.batch.cycle_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_env::<bool>("TRIAGE_MARK_FAILED_AS_SEEN")? {
            config.batch.mark_failed_as_seen = v;
        }
        if let Some(v) = parse_env::<u32>("TRIAGE_MAX_RETRIES")? {
            config.resilience.max_retries = v;
        }
        if let Some(v) = parse_env::<u64>("TRIAGE_BACKOFF_BASE_MS")? {
            config.resilience.backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = parse_env::<u32>("TRIAGE_BREAKER_THRESHOLD")? {
            config.resilience.breaker_failure_threshold = v;
        }
        if let Some(v) = parse_env::<u64>("TRIAGE_BREAKER_COOLDOWN_SECS")? {
            config.resilience.breaker_cooldown = Duration::from_secs(v);
        }
        if let Some(v) = parse_env::<usize>("TRIAGE_MIN_GROUP_SIZE")? {
            config.escalation.min_group_size = v;
        }
        if let Ok(v) = std::env::var("TRIAGE_FALLBACK_RESPONDER") {
            config.escalation.fallback_responder = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that must hold before the engine starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;

        if self.batch.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch.concurrency".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.escalation.min_group_size < 2 {
            return Err(ConfigError::InvalidValue {
                key: "escalation.min_group_size".into(),
                message: "escalation groups need at least 2 members".into(),
            });
        }
        if self.escalation.fallback_responder.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "escalation.fallback_responder".into(),
                message: "fallback responder must be set".into(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(None),
    }
}
