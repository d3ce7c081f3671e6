//! Fault recovery - per-agent circuit breakers.
//!
//! Isolates agents after repeated failures and re-admits them after a
//! cooldown plus a successful probation period. The breaker walks
//! closed -> open -> half_open -> closed; a failure during probation
//! reopens the circuit immediately. Entry into half_open is lazy: it
//! happens on the first health query after the cooldown, not on a timer.
//!
//! This is the designated sink for problem reports from the other
//! components; none of its operations panic or return errors.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesh_journal::{Journal, JournalError};

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Consecutive failures that trip a closed breaker.
    pub failure_threshold: u32,
    /// Cooldown after the last failure before probation may begin.
    pub reset_timeout: chrono::Duration,
    /// Consecutive probation successes required to close the breaker.
    pub success_threshold: u32,
    /// Hard cap used by `can_retry`.
    pub max_retries: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: chrono::Duration::seconds(60),
            success_threshold: 3,
            max_retries: 3,
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Tripped; calls should be routed elsewhere.
    Open,
    /// Probation: letting traffic through to test recovery.
    HalfOpen,
}

/// One recorded failure event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub failure_id: String,
    pub agent_id: String,
    pub error_type: String,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub recovered: bool,
    pub recovery_time: Option<DateTime<Utc>>,
}

/// Breaker bookkeeping for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub agent_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count_since_open: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub state_change_time: DateTime<Utc>,
}

impl CircuitBreakerState {
    fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count_since_open: 0,
            last_failure_time: None,
            last_success_time: None,
            state_change_time: Utc::now(),
        }
    }
}

/// Aggregate health figures across all tracked breakers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub total_agents: usize,
    pub healthy_agents: usize,
    pub failing_agents: usize,
    pub recovering_agents: usize,
    pub total_failures: usize,
    pub recovered_failures: usize,
    pub percentage_healthy: f64,
}

type RecoveryStrategy = Box<dyn Fn() -> Result<(), String> + Send>;

/// Tracks failures per agent and gates routing decisions.
pub struct FaultRecovery {
    config: RecoveryConfig,
    failures: HashMap<String, Failure>,
    breakers: HashMap<String, CircuitBreakerState>,
    strategies: HashMap<String, RecoveryStrategy>,
    journal: Journal,
}

impl FaultRecovery {
    pub fn open(data_dir: &Path) -> Result<Self, JournalError> {
        Self::with_config(data_dir, RecoveryConfig::default())
    }

    /// Open the failure log under `data_dir` and replay it. Breakers are
    /// runtime state and start closed.
    pub fn with_config(data_dir: &Path, config: RecoveryConfig) -> Result<Self, JournalError> {
        let journal = Journal::open(data_dir.join("failures.jsonl"))?;

        let mut failures = HashMap::new();
        for record in journal.load_all::<Failure>()? {
            failures.insert(record.failure_id.clone(), record);
        }

        tracing::info!(failures = failures.len(), "fault recovery opened");
        Ok(Self {
            config,
            failures,
            breakers: HashMap::new(),
            strategies: HashMap::new(),
            journal,
        })
    }

    /// Record a failure and advance the agent's breaker.
    ///
    /// A closed breaker opens once consecutive failures reach the
    /// threshold; a half-open breaker reopens immediately.
    pub fn register_failure(
        &mut self,
        agent_id: &str,
        error_type: &str,
        error_message: &str,
        context: HashMap<String, serde_json::Value>,
    ) -> String {
        let failure_id = uuid::Uuid::new_v4().to_string();
        let failure = Failure {
            failure_id: failure_id.clone(),
            agent_id: agent_id.to_string(),
            error_type: error_type.to_string(),
            error_message: error_message.to_string(),
            timestamp: Utc::now(),
            context,
            recovered: false,
            recovery_time: None,
        };
        if let Err(e) = self.journal.append(&failure) {
            tracing::error!(error = %e, "failed to append failure record");
        }
        self.failures.insert(failure_id.clone(), failure);

        let breaker = self
            .breakers
            .entry(agent_id.to_string())
            .or_insert_with(|| CircuitBreakerState::new(agent_id));
        breaker.failure_count += 1;
        breaker.last_failure_time = Some(Utc::now());

        match breaker.state {
            CircuitState::Closed if breaker.failure_count >= self.config.failure_threshold => {
                breaker.state = CircuitState::Open;
                breaker.state_change_time = Utc::now();
                tracing::warn!(agent_id = %agent_id, "circuit opened");
            }
            CircuitState::HalfOpen => {
                breaker.state = CircuitState::Open;
                breaker.success_count_since_open = 0;
                breaker.state_change_time = Utc::now();
                tracing::warn!(agent_id = %agent_id, "circuit reopened during probation");
            }
            _ => {}
        }

        failure_id
    }

    /// Record a successful interaction with the agent.
    ///
    /// While closed, this bleeds off one counted failure; during
    /// probation it counts toward the success threshold and closes the
    /// breaker when that is reached.
    pub fn record_success(&mut self, agent_id: &str) {
        let success_threshold = self.config.success_threshold;
        let breaker = self
            .breakers
            .entry(agent_id.to_string())
            .or_insert_with(|| CircuitBreakerState::new(agent_id));
        breaker.last_success_time = Some(Utc::now());

        match breaker.state {
            CircuitState::HalfOpen => {
                breaker.success_count_since_open += 1;
                if breaker.success_count_since_open >= success_threshold {
                    breaker.state = CircuitState::Closed;
                    breaker.failure_count = 0;
                    breaker.success_count_since_open = 0;
                    breaker.state_change_time = Utc::now();
                    tracing::info!(agent_id = %agent_id, "circuit closed");
                    self.mark_failures_recovered(agent_id);
                }
            }
            CircuitState::Closed => {
                breaker.failure_count = breaker.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    /// Whether calls should currently be routed to the agent.
    ///
    /// An open breaker whose cooldown has elapsed flips to half_open
    /// here; this query is the only entry into probation.
    pub fn is_healthy(&mut self, agent_id: &str) -> bool {
        let reset_timeout = self.config.reset_timeout;
        let breaker = match self.breakers.get_mut(agent_id) {
            Some(b) => b,
            None => return true,
        };

        match breaker.state {
            CircuitState::Open => {
                let cooled_down = breaker
                    .last_failure_time
                    .map(|t| Utc::now() - t >= reset_timeout)
                    .unwrap_or(false);
                if cooled_down {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.success_count_since_open = 0;
                    breaker.state_change_time = Utc::now();
                    tracing::info!(agent_id = %agent_id, "circuit half-open");
                    true
                } else {
                    false
                }
            }
            _ => true,
        }
    }

    /// Whether a task may be retried on the agent.
    pub fn can_retry(&mut self, agent_id: &str, retry_count: u32) -> bool {
        retry_count < self.config.max_retries && self.is_healthy(agent_id)
    }

    /// Install a recovery callback for an agent.
    pub fn register_recovery_strategy(
        &mut self,
        agent_id: &str,
        strategy: impl Fn() -> Result<(), String> + Send + 'static,
    ) {
        self.strategies
            .insert(agent_id.to_string(), Box::new(strategy));
        tracing::debug!(agent_id = %agent_id, "recovery strategy registered");
    }

    /// Run the agent's recovery callback, if one is installed. A
    /// successful run is reported through `record_success`.
    pub fn attempt_recovery(&mut self, agent_id: &str) -> bool {
        let outcome = match self.strategies.get(agent_id) {
            Some(strategy) => strategy(),
            None => return false,
        };

        match outcome {
            Ok(()) => {
                self.record_success(agent_id);
                tracing::info!(agent_id = %agent_id, "recovery attempt succeeded");
                true
            }
            Err(e) => {
                tracing::error!(agent_id = %agent_id, error = %e, "recovery attempt failed");
                false
            }
        }
    }

    pub fn failure(&self, failure_id: &str) -> Option<&Failure> {
        self.failures.get(failure_id)
    }

    pub fn agent_failures(&self, agent_id: &str) -> Vec<&Failure> {
        self.failures
            .values()
            .filter(|f| f.agent_id == agent_id)
            .collect()
    }

    pub fn circuit_breaker(&self, agent_id: &str) -> Option<&CircuitBreakerState> {
        self.breakers.get(agent_id)
    }

    pub fn health_status(&self) -> HealthStatus {
        let count_state = |state: CircuitState| {
            self.breakers.values().filter(|b| b.state == state).count()
        };
        let healthy = count_state(CircuitState::Closed);

        HealthStatus {
            total_agents: self.breakers.len(),
            healthy_agents: healthy,
            failing_agents: count_state(CircuitState::Open),
            recovering_agents: count_state(CircuitState::HalfOpen),
            total_failures: self.failures.len(),
            recovered_failures: self.failures.values().filter(|f| f.recovered).count(),
            percentage_healthy: if self.breakers.is_empty() {
                100.0
            } else {
                healthy as f64 / self.breakers.len() as f64 * 100.0
            },
        }
    }

    /// Flag the agent's outstanding failures as recovered once its
    /// breaker closes again.
    fn mark_failures_recovered(&mut self, agent_id: &str) {
        let now = Utc::now();
        for failure in self
            .failures
            .values_mut()
            .filter(|f| f.agent_id == agent_id && !f.recovered)
        {
            failure.recovered = true;
            failure.recovery_time = Some(now);
            if let Err(e) = self.journal.append(failure) {
                tracing::error!(error = %e, "failed to append recovery update");
            }
        }
    }
}
