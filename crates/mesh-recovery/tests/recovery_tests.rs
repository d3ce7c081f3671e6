//! Circuit breaker lifecycle tests: trip, cooldown, probation, reopen.

use std::collections::HashMap;

use mesh_recovery::{CircuitState, FaultRecovery, RecoveryConfig};

fn quick_config() -> RecoveryConfig {
    RecoveryConfig {
        failure_threshold: 3,
        // Zero cooldown: the first health query after opening may enter
        // probation immediately.
        reset_timeout: chrono::Duration::zero(),
        success_threshold: 2,
        max_retries: 3,
    }
}

fn fail(recovery: &mut FaultRecovery, agent: &str) -> String {
    recovery.register_failure(agent, "timeout", "no response", HashMap::new())
}

#[test]
fn test_unknown_agent_is_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = FaultRecovery::open(dir.path()).unwrap();
    assert!(recovery.is_healthy("unseen"));
    assert!(recovery.circuit_breaker("unseen").is_none());
}

#[test]
fn test_breaker_opens_at_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = FaultRecovery::with_config(
        dir.path(),
        RecoveryConfig {
            reset_timeout: chrono::Duration::seconds(60),
            ..quick_config()
        },
    )
    .unwrap();

    fail(&mut recovery, "a");
    fail(&mut recovery, "a");
    assert_eq!(
        recovery.circuit_breaker("a").unwrap().state,
        CircuitState::Closed
    );

    fail(&mut recovery, "a");
    assert_eq!(
        recovery.circuit_breaker("a").unwrap().state,
        CircuitState::Open
    );
    assert!(!recovery.is_healthy("a"), "open breaker still cooling down");
}

#[test]
fn test_full_recovery_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = FaultRecovery::with_config(dir.path(), quick_config()).unwrap();

    for _ in 0..3 {
        fail(&mut recovery, "a");
    }
    assert_eq!(
        recovery.circuit_breaker("a").unwrap().state,
        CircuitState::Open
    );

    // Cooldown elapsed (zero): the health query itself enters probation.
    assert!(recovery.is_healthy("a"));
    assert_eq!(
        recovery.circuit_breaker("a").unwrap().state,
        CircuitState::HalfOpen
    );

    recovery.record_success("a");
    assert_eq!(
        recovery.circuit_breaker("a").unwrap().state,
        CircuitState::HalfOpen
    );
    recovery.record_success("a");
    let breaker = recovery.circuit_breaker("a").unwrap();
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.failure_count, 0);
}

#[test]
fn test_probation_failure_reopens_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = FaultRecovery::with_config(dir.path(), quick_config()).unwrap();

    for _ in 0..3 {
        fail(&mut recovery, "a");
    }
    assert!(recovery.is_healthy("a"));
    assert_eq!(
        recovery.circuit_breaker("a").unwrap().state,
        CircuitState::HalfOpen
    );

    recovery.record_success("a");
    fail(&mut recovery, "a");
    assert_eq!(
        recovery.circuit_breaker("a").unwrap().state,
        CircuitState::Open,
        "one probation failure must reopen the circuit"
    );
    assert_eq!(
        recovery.circuit_breaker("a").unwrap().success_count_since_open,
        0,
        "probation progress must reset on reopen"
    );
}

#[test]
fn test_success_bleeds_off_failures_while_closed() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = FaultRecovery::with_config(dir.path(), quick_config()).unwrap();

    fail(&mut recovery, "a");
    fail(&mut recovery, "a");
    recovery.record_success("a");
    fail(&mut recovery, "a");

    // 2 - 1 + 1 = 2 counted failures: still below the threshold of 3.
    assert_eq!(
        recovery.circuit_breaker("a").unwrap().state,
        CircuitState::Closed
    );
}

#[test]
fn test_can_retry_caps_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = FaultRecovery::with_config(dir.path(), quick_config()).unwrap();

    assert!(recovery.can_retry("a", 0));
    assert!(recovery.can_retry("a", 2));
    assert!(!recovery.can_retry("a", 3), "retry count hits max_retries");

    for _ in 0..3 {
        fail(&mut recovery, "b");
    }
    // Healthy check flips to half-open under zero cooldown, so use a
    // breaker that is still cooling down.
    let mut cold = FaultRecovery::with_config(
        dir.path().join("cold").as_path(),
        RecoveryConfig {
            reset_timeout: chrono::Duration::seconds(60),
            ..quick_config()
        },
    )
    .unwrap();
    for _ in 0..3 {
        fail(&mut cold, "c");
    }
    assert!(!cold.can_retry("c", 0), "open breaker blocks retries");
}

#[test]
fn test_recovery_strategy_routes_through_success() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = FaultRecovery::with_config(dir.path(), quick_config()).unwrap();

    assert!(
        !recovery.attempt_recovery("a"),
        "no strategy registered yet"
    );

    for _ in 0..3 {
        fail(&mut recovery, "a");
    }
    assert!(recovery.is_healthy("a")); // half-open

    recovery.register_recovery_strategy("a", || Ok(()));
    assert!(recovery.attempt_recovery("a"));
    assert!(recovery.attempt_recovery("a"));
    assert_eq!(
        recovery.circuit_breaker("a").unwrap().state,
        CircuitState::Closed,
        "two successful recovery attempts close the breaker"
    );

    recovery.register_recovery_strategy("b", || Err("still down".to_string()));
    assert!(!recovery.attempt_recovery("b"));
}

#[test]
fn test_recovered_failures_are_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = FaultRecovery::with_config(dir.path(), quick_config()).unwrap();

    let failure_id = fail(&mut recovery, "a");
    fail(&mut recovery, "a");
    fail(&mut recovery, "a");
    assert!(recovery.is_healthy("a"));
    recovery.record_success("a");
    recovery.record_success("a");

    let failure = recovery.failure(&failure_id).unwrap();
    assert!(failure.recovered);
    assert!(failure.recovery_time.is_some());
    assert_eq!(recovery.health_status().recovered_failures, 3);
}

#[test]
fn test_health_status_breakdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = FaultRecovery::with_config(dir.path(), quick_config()).unwrap();

    recovery.record_success("fine");
    for _ in 0..3 {
        fail(&mut recovery, "broken");
    }

    let status = recovery.health_status();
    assert_eq!(status.total_agents, 2);
    assert_eq!(status.healthy_agents, 1);
    assert_eq!(status.failing_agents, 1);
    assert_eq!(status.recovering_agents, 0);
    assert_eq!(status.total_failures, 3);
    assert!((status.percentage_healthy - 50.0).abs() < f64::EPSILON);
}

#[test]
fn test_failure_log_replays_across_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let failure_id = {
        let mut recovery = FaultRecovery::with_config(dir.path(), quick_config()).unwrap();
        fail(&mut recovery, "a")
    };

    let recovery = FaultRecovery::with_config(dir.path(), quick_config()).unwrap();
    let failure = recovery.failure(&failure_id).expect("failure must replay");
    assert_eq!(failure.agent_id, "a");
    assert_eq!(recovery.agent_failures("a").len(), 1);
    assert!(
        recovery.circuit_breaker("a").is_none(),
        "breakers are runtime state and start closed after reopen"
    );
}
