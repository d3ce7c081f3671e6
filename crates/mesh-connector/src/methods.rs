//! Coordination methods exposed over the RPC listener.
//!
//! This is where the five components get wired together: candidates come
//! from the registry, unhealthy agents are filtered out by the circuit
//! breakers before the balancer picks, and task outcomes are reported
//! back to fault recovery.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Map, Value};

use mesh_balancer::{Candidate, LoadBalancer, Strategy};
use mesh_recovery::FaultRecovery;
use mesh_registry::AgentRegistry;
use mesh_rpc::{HandlerError, RpcService};
use mesh_state::StateStore;

use crate::config::ConnectorConfig;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn required_str(params: &Map<String, Value>, key: &str) -> Result<String, HandlerError> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(HandlerError::InvalidParams(format!("missing '{key}'"))),
    }
}

fn required_u64(params: &Map<String, Value>, key: &str) -> Result<u64, HandlerError> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerError::InvalidParams(format!("missing '{key}'")))
}

fn required_value(params: &Map<String, Value>, key: &str) -> Result<Value, HandlerError> {
    params
        .get(key)
        .cloned()
        .ok_or_else(|| HandlerError::InvalidParams(format!("missing '{key}'")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(|e| HandlerError::Internal(e.to_string()))
}

/// Candidates arrive either as `[{"agent_id": .., "name": ..}, ..]` or as
/// a bare list of ids.
fn parse_candidates(value: &Value) -> Result<Vec<Candidate>, HandlerError> {
    let entries = value
        .as_array()
        .ok_or_else(|| HandlerError::InvalidParams("'candidates' must be an array".into()))?;

    entries
        .iter()
        .map(|entry| match entry {
            Value::String(id) => Ok(Candidate {
                agent_id: id.clone(),
                name: id.clone(),
            }),
            Value::Object(obj) => {
                let agent_id = obj
                    .get("agent_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        HandlerError::InvalidParams("candidate missing 'agent_id'".into())
                    })?;
                let name = obj
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(agent_id);
                Ok(Candidate {
                    agent_id: agent_id.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(HandlerError::InvalidParams(
                "candidate must be a string or object".into(),
            )),
        })
        .collect()
}

/// Register the full coordination surface on `service`.
pub fn register_coordination_methods(
    service: &RpcService,
    config: &ConnectorConfig,
) -> anyhow::Result<()> {
    let registry = Arc::new(Mutex::new(AgentRegistry::with_heartbeat_timeout(
        &config.data_dir,
        config.heartbeat_timeout_secs,
    )?));
    let balancer = Arc::new(Mutex::new(LoadBalancer::open(&config.data_dir)?));
    let recovery = Arc::new(Mutex::new(FaultRecovery::with_config(
        &config.data_dir,
        config.recovery_config(),
    )?));
    let state = Arc::new(Mutex::new(StateStore::open(
        &config.agent_id,
        &config.data_dir,
    )?));

    service.register_method("mesh.ping", |_params| Ok(json!({"pong": true})));

    {
        let registry = Arc::clone(&registry);
        service.register_method("mesh.register_agent", move |params| {
            let name = required_str(params, "name")?;
            let host = required_str(params, "host")?;
            let port = required_u64(params, "port")? as u16;
            let capabilities = params
                .get("capabilities")
                .and_then(|v| v.as_array())
                .map(|caps| {
                    caps.iter()
                        .filter_map(|c| c.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            let metadata = params
                .get("metadata")
                .and_then(|v| v.as_object())
                .map(|m| m.clone().into_iter().collect())
                .unwrap_or_else(HashMap::new);

            let agent_id = lock(&registry).register(&name, &host, port, capabilities, metadata);
            Ok(json!({"agent_id": agent_id}))
        });
    }

    {
        let registry = Arc::clone(&registry);
        service.register_method("mesh.list_agents", move |params| {
            let mut registry = lock(&registry);
            let topology = registry.topology();
            let agents: Vec<&mesh_registry::AgentRecord> = topology
                .agents
                .values()
                .filter(|a| match params.get("capability").and_then(|v| v.as_str()) {
                    Some(cap) => a.capabilities.iter().any(|c| c == cap),
                    None => true,
                })
                .collect();
            encode(&agents)
        });
    }

    {
        let registry = Arc::clone(&registry);
        service.register_method("mesh.heartbeat", move |params| {
            let agent_id = required_str(params, "agent_id")?;
            Ok(json!({"ok": lock(&registry).heartbeat(&agent_id)}))
        });
    }

    {
        let registry = Arc::clone(&registry);
        service.register_method("mesh.connect", move |params| {
            let a = required_str(params, "a")?;
            let b = required_str(params, "b")?;
            Ok(json!({"ok": lock(&registry).connect(&a, &b)}))
        });
    }

    {
        let registry = Arc::clone(&registry);
        service.register_method("mesh.topology", move |_params| {
            encode(&lock(&registry).topology())
        });
    }

    {
        let registry = Arc::clone(&registry);
        let balancer = Arc::clone(&balancer);
        let recovery = Arc::clone(&recovery);
        service.register_method("mesh.assign_task", move |params| {
            let task_id = required_str(params, "task_id")?;
            let strategy = match params.get("strategy").and_then(|v| v.as_str()) {
                Some(s) => Strategy::from_str(s).map_err(HandlerError::InvalidParams)?,
                None => Strategy::LeastLoaded,
            };
            let weights: Option<HashMap<String, f64>> = params
                .get("weights")
                .and_then(|v| v.as_object())
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(k, v)| v.as_f64().map(|w| (k.clone(), w)))
                        .collect()
                });

            // Candidates are supplied inline, or pulled from the roster
            // by capability.
            let candidates = match params.get("candidates") {
                Some(value) => parse_candidates(value)?,
                None => {
                    let capability = required_str(params, "capability").map_err(|_| {
                        HandlerError::InvalidParams(
                            "either 'candidates' or 'capability' is required".into(),
                        )
                    })?;
                    let registry = lock(&registry);
                    registry
                        .agents_by_capability(&capability)
                        .into_iter()
                        .map(|a| Candidate {
                            agent_id: a.agent_id.clone(),
                            name: a.name.clone(),
                        })
                        .collect()
                }
            };

            // Agents behind an open breaker never receive work.
            let healthy: Vec<Candidate> = {
                let mut recovery = lock(&recovery);
                candidates
                    .into_iter()
                    .filter(|c| recovery.is_healthy(&c.agent_id))
                    .collect()
            };

            let assigned =
                lock(&balancer).assign_task(&task_id, &healthy, strategy, weights.as_ref());
            match assigned {
                Some(agent) => Ok(json!({"task_id": task_id, "agent": encode(&agent)?})),
                None => Ok(json!({"task_id": task_id, "agent": null})),
            }
        });
    }

    {
        let balancer = Arc::clone(&balancer);
        let recovery = Arc::clone(&recovery);
        service.register_method("mesh.complete_task", move |params| {
            let task_id = required_str(params, "task_id")?;
            let duration = params
                .get("duration_secs")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let success = params
                .get("success")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            let result = params.get("result").cloned();
            let error = params
                .get("error")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            let mut balancer = lock(&balancer);
            let agent_id = balancer.assignment(&task_id).map(|a| a.agent_id.clone());
            let ok = balancer.complete_task(&task_id, duration, success, result, error.clone());

            // Outcomes feed the breakers.
            if ok {
                if let Some(agent_id) = agent_id {
                    let mut recovery = lock(&recovery);
                    if success {
                        recovery.record_success(&agent_id);
                    } else {
                        recovery.register_failure(
                            &agent_id,
                            "task_failure",
                            error.as_deref().unwrap_or("task failed"),
                            HashMap::new(),
                        );
                    }
                }
            }
            Ok(json!({"ok": ok}))
        });
    }

    {
        let balancer = Arc::clone(&balancer);
        service.register_method("mesh.load_stats", move |_params| {
            encode(&lock(&balancer).load_statistics())
        });
    }

    {
        let recovery = Arc::clone(&recovery);
        service.register_method("mesh.report_failure", move |params| {
            let agent_id = required_str(params, "agent_id")?;
            let error_type = params
                .get("error_type")
                .and_then(|v| v.as_str())
                .unwrap_or("error");
            let message = params
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let context = params
                .get("context")
                .and_then(|v| v.as_object())
                .map(|m| m.clone().into_iter().collect())
                .unwrap_or_else(HashMap::new);

            let failure_id =
                lock(&recovery).register_failure(&agent_id, error_type, message, context);
            Ok(json!({"failure_id": failure_id}))
        });
    }

    {
        let recovery = Arc::clone(&recovery);
        service.register_method("mesh.agent_health", move |params| {
            let agent_id = required_str(params, "agent_id")?;
            let mut recovery = lock(&recovery);
            let healthy = recovery.is_healthy(&agent_id);
            let breaker = recovery.circuit_breaker(&agent_id);
            Ok(json!({"agent_id": agent_id, "healthy": healthy, "breaker": encode(&breaker)?}))
        });
    }

    {
        let state = Arc::clone(&state);
        service.register_method("mesh.set_state", move |params| {
            let key = required_str(params, "key")?;
            let value = required_value(params, "value")?;
            let mut state = lock(&state);
            let change_id = state.set(&key, value);
            let version = state.version(&key).map(|v| v.current_version);
            Ok(json!({"change_id": change_id, "version": version}))
        });
    }

    {
        let state = Arc::clone(&state);
        service.register_method("mesh.get_state", move |params| {
            let state = lock(&state);
            match params.get("key").and_then(|v| v.as_str()) {
                Some(key) => Ok(json!({
                    "key": key,
                    "value": state.get(key).cloned(),
                    "version": state.version(key).map(|v| v.current_version),
                })),
                None => encode(state.get_all()),
            }
        });
    }

    {
        let state = Arc::clone(&state);
        service.register_method("mesh.sync_state", move |params| {
            let key = required_str(params, "key")?;
            let value = required_value(params, "value")?;
            let version = required_u64(params, "version")?;
            let source = required_str(params, "source_agent")?;
            let accepted = lock(&state).sync(&key, value, version, &source);
            Ok(json!({"accepted": accepted}))
        });
    }

    {
        let registry = Arc::clone(&registry);
        let balancer = Arc::clone(&balancer);
        let recovery = Arc::clone(&recovery);
        let state = Arc::clone(&state);
        service.register_method("mesh.status", move |_params| {
            Ok(json!({
                "roster": encode(&lock(&registry).statistics())?,
                "load": encode(&lock(&balancer).load_statistics())?,
                "health": encode(&lock(&recovery).health_status())?,
                "consistency": encode(&lock(&state).consistency_status())?,
            }))
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_rpc::RpcService;

    fn serve_config(dir: &std::path::Path) -> ConnectorConfig {
        ConnectorConfig {
            agent_id: "connector-test".to_string(),
            data_dir: dir.to_path_buf(),
            ..ConnectorConfig::default()
        }
    }

    fn call(service: &RpcService, method: &str, params: Value) -> Value {
        let raw = json!({
            "protocol_version": "2.0",
            "method": method,
            "params": params,
            "id": "t",
        })
        .to_string();
        serde_json::from_str(&service.handle_request(&raw)).unwrap()
    }

    #[test]
    fn test_register_then_assign_by_capability() {
        let dir = tempfile::tempdir().unwrap();
        let config = serve_config(dir.path());
        let service = RpcService::open(&config.agent_id, &config.data_dir).unwrap();
        register_coordination_methods(&service, &config).unwrap();

        let reg = call(
            &service,
            "mesh.register_agent",
            json!({"name": "w1", "host": "127.0.0.1", "port": 9001, "capabilities": ["compute"]}),
        );
        let agent_id = reg["result"]["agent_id"].as_str().unwrap().to_string();

        let assigned = call(
            &service,
            "mesh.assign_task",
            json!({"task_id": "t1", "capability": "compute", "strategy": "round_robin"}),
        );
        assert_eq!(
            assigned["result"]["agent"]["agent_id"],
            json!(agent_id),
            "the registered agent must be assignable by capability"
        );
    }

    #[test]
    fn test_task_outcome_feeds_breakers() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConnectorConfig {
            failure_threshold: 2,
            ..serve_config(dir.path())
        };
        let service = RpcService::open(&config.agent_id, &config.data_dir).unwrap();
        register_coordination_methods(&service, &config).unwrap();

        for i in 0..2 {
            call(
                &service,
                "mesh.assign_task",
                json!({"task_id": format!("t{i}"), "candidates": ["flaky"]}),
            );
            call(
                &service,
                "mesh.complete_task",
                json!({"task_id": format!("t{i}"), "success": false, "error": "boom"}),
            );
        }

        let health = call(&service, "mesh.agent_health", json!({"agent_id": "flaky"}));
        assert_eq!(health["result"]["healthy"], json!(false));

        // With the breaker open, the only candidate is filtered out.
        let assigned = call(
            &service,
            "mesh.assign_task",
            json!({"task_id": "t9", "candidates": ["flaky"]}),
        );
        assert_eq!(assigned["result"]["agent"], json!(null));
    }

    #[test]
    fn test_state_methods_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = serve_config(dir.path());
        let service = RpcService::open(&config.agent_id, &config.data_dir).unwrap();
        register_coordination_methods(&service, &config).unwrap();

        let set = call(
            &service,
            "mesh.set_state",
            json!({"key": "mode", "value": "fast"}),
        );
        assert_eq!(set["result"]["version"], json!(1));

        let get = call(&service, "mesh.get_state", json!({"key": "mode"}));
        assert_eq!(get["result"]["value"], json!("fast"));

        let stale = call(
            &service,
            "mesh.sync_state",
            json!({"key": "mode", "value": "slow", "version": 1, "source_agent": "peer"}),
        );
        assert_eq!(stale["result"]["accepted"], json!(false));

        let fresh = call(
            &service,
            "mesh.sync_state",
            json!({"key": "mode", "value": "slow", "version": 2, "source_agent": "peer"}),
        );
        assert_eq!(fresh["result"]["accepted"], json!(true));
    }

    #[test]
    fn test_missing_params_map_to_invalid_params() {
        let dir = tempfile::tempdir().unwrap();
        let config = serve_config(dir.path());
        let service = RpcService::open(&config.agent_id, &config.data_dir).unwrap();
        register_coordination_methods(&service, &config).unwrap();

        let response = call(&service, "mesh.register_agent", json!({"name": "incomplete"}));
        assert_eq!(response["error"]["code"], json!(-32602));
    }
}
