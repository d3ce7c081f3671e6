//! Subcommand implementations. Each is a thin pass-through to one
//! coordination operation; output is plain text or pretty JSON.

use std::collections::HashMap;
use std::str::FromStr;

use mesh_balancer::{Candidate, LoadBalancer, Strategy};
use mesh_protocol::RpcRequest;
use mesh_recovery::FaultRecovery;
use mesh_registry::AgentRegistry;
use mesh_rpc::{call_remote, Framing, RpcService};
use mesh_state::StateStore;

use crate::config::ConnectorConfig;

fn open_registry(config: &ConnectorConfig) -> anyhow::Result<AgentRegistry> {
    Ok(AgentRegistry::with_heartbeat_timeout(
        &config.data_dir,
        config.heartbeat_timeout_secs,
    )?)
}

fn open_balancer(config: &ConnectorConfig) -> anyhow::Result<LoadBalancer> {
    Ok(LoadBalancer::open(&config.data_dir)?)
}

fn open_recovery(config: &ConnectorConfig) -> anyhow::Result<FaultRecovery> {
    Ok(FaultRecovery::with_config(
        &config.data_dir,
        config.recovery_config(),
    )?)
}

fn open_state(config: &ConnectorConfig) -> anyhow::Result<StateStore> {
    Ok(StateStore::open(&config.agent_id, &config.data_dir)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn register(
    config: &ConnectorConfig,
    name: &str,
    host: &str,
    port: u16,
    capabilities: Vec<String>,
) -> anyhow::Result<()> {
    let mut registry = open_registry(config)?;
    let agent_id = registry.register(name, host, port, capabilities, HashMap::new());
    println!("{agent_id}");
    Ok(())
}

pub fn deregister(config: &ConnectorConfig, agent_id: &str) -> anyhow::Result<()> {
    let mut registry = open_registry(config)?;
    if registry.deregister(agent_id) {
        println!("deregistered {agent_id}");
    } else {
        println!("unknown agent: {agent_id}");
    }
    Ok(())
}

pub fn agents(config: &ConnectorConfig, capability: Option<&str>) -> anyhow::Result<()> {
    let mut registry = open_registry(config)?;
    let topology = registry.topology();

    let mut records: Vec<_> = topology
        .agents
        .values()
        .filter(|a| match capability {
            Some(cap) => a.capabilities.iter().any(|c| c == cap),
            None => true,
        })
        .collect();
    records.sort_by(|a, b| a.name.cmp(&b.name));

    if records.is_empty() {
        println!("no agents found");
        return Ok(());
    }
    for agent in records {
        println!(
            "{} - {} @ {}:{} ({:?}) [{}]",
            agent.agent_id,
            agent.name,
            agent.host,
            agent.port,
            agent.status,
            agent.capabilities.join(",")
        );
    }
    Ok(())
}

pub fn heartbeat(config: &ConnectorConfig, agent_id: &str) -> anyhow::Result<()> {
    let mut registry = open_registry(config)?;
    if registry.heartbeat(agent_id) {
        println!("heartbeat recorded for {agent_id}");
    } else {
        println!("unknown agent: {agent_id}");
    }
    Ok(())
}

pub fn connect(config: &ConnectorConfig, a: &str, b: &str) -> anyhow::Result<()> {
    let mut registry = open_registry(config)?;
    if registry.connect(a, b) {
        println!("connected {a} <-> {b}");
    } else {
        println!("one or both agents unknown");
    }
    Ok(())
}

pub fn topology(config: &ConnectorConfig) -> anyhow::Result<()> {
    let mut registry = open_registry(config)?;
    print_json(&registry.topology())
}

pub fn stats(config: &ConnectorConfig) -> anyhow::Result<()> {
    let mut registry = open_registry(config)?;
    print_json(&registry.statistics())
}

pub async fn call(
    config: &ConnectorConfig,
    method: &str,
    params: &str,
    addr: Option<&str>,
    framing: Option<&str>,
) -> anyhow::Result<()> {
    let params: serde_json::Map<String, serde_json::Value> = serde_json::from_str(params)
        .map_err(|e| anyhow::anyhow!("params must be a JSON object: {e}"))?;
    let request = serde_json::to_string(&RpcRequest::new(method, params))?;

    let addr = match addr {
        Some(a) => a.to_string(),
        None => format!("{}:{}", config.listen.host, config.listen.port),
    };
    let framing = match framing {
        Some(f) => Framing::from_str(f).map_err(|e| anyhow::anyhow!(e))?,
        None => Framing::from_str(&config.listen.framing).map_err(|e| anyhow::anyhow!(e))?,
    };

    let response = call_remote(&addr, framing, &request).await?;
    println!("{response}");
    Ok(())
}

pub async fn serve(config: &ConnectorConfig) -> anyhow::Result<()> {
    let service = RpcService::open(&config.agent_id, &config.data_dir)?;
    crate::methods::register_coordination_methods(&service, config)?;

    let port = service.start_listening(config.listener_config()?).await?;
    println!("listening on {}:{port}", config.listen.host);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    service.stop_listening().await;
    Ok(())
}

pub fn assign(
    config: &ConnectorConfig,
    task_id: &str,
    candidates: &str,
    strategy: &str,
) -> anyhow::Result<()> {
    let strategy = Strategy::from_str(strategy).map_err(|e| anyhow::anyhow!(e))?;
    let candidates: Vec<Candidate> = candidates
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|id| Candidate {
            agent_id: id.trim().to_string(),
            name: id.trim().to_string(),
        })
        .collect();

    let mut balancer = open_balancer(config)?;
    match balancer.assign_task(task_id, &candidates, strategy, None) {
        Some(agent) => println!("{} -> {}", task_id, agent.agent_id),
        None => println!("no agent selected"),
    }
    Ok(())
}

pub fn complete(
    config: &ConnectorConfig,
    task_id: &str,
    duration: f64,
    success: bool,
    error: Option<String>,
) -> anyhow::Result<()> {
    let mut balancer = open_balancer(config)?;
    if balancer.complete_task(task_id, duration, success, None, error) {
        println!("completed {task_id}");
    } else {
        println!("unknown task: {task_id}");
    }
    Ok(())
}

pub fn load(config: &ConnectorConfig) -> anyhow::Result<()> {
    let balancer = open_balancer(config)?;
    print_json(&balancer.load_statistics())
}

pub fn fail(
    config: &ConnectorConfig,
    agent_id: &str,
    error_type: &str,
    message: &str,
) -> anyhow::Result<()> {
    let mut recovery = open_recovery(config)?;
    let failure_id = recovery.register_failure(agent_id, error_type, message, HashMap::new());
    println!("{failure_id}");
    Ok(())
}

pub fn health(config: &ConnectorConfig, agent_id: Option<&str>) -> anyhow::Result<()> {
    let mut recovery = open_recovery(config)?;
    match agent_id {
        Some(id) => {
            let healthy = recovery.is_healthy(id);
            println!("{id}: {}", if healthy { "healthy" } else { "unhealthy" });
        }
        None => print_json(&recovery.health_status())?,
    }
    Ok(())
}

pub fn set(config: &ConnectorConfig, key: &str, value: &str) -> anyhow::Result<()> {
    // Accept any JSON value; bare words fall back to strings.
    let value: serde_json::Value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));

    let mut store = open_state(config)?;
    let change_id = store.set(key, value);
    println!("{change_id}");
    Ok(())
}

pub fn get(config: &ConnectorConfig, key: Option<&str>) -> anyhow::Result<()> {
    let store = open_state(config)?;
    match key {
        Some(key) => match store.get(key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
            None => println!("null"),
        },
        None => print_json(store.get_all())?,
    }
    Ok(())
}

pub fn sync(
    config: &ConnectorConfig,
    key: &str,
    value: &str,
    version: u64,
    source: &str,
) -> anyhow::Result<()> {
    let value: serde_json::Value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));

    let mut store = open_state(config)?;
    if store.sync(key, value, version, source) {
        println!("accepted");
    } else {
        println!("rejected (stale version)");
    }
    Ok(())
}

pub fn conflicts(config: &ConnectorConfig) -> anyhow::Result<()> {
    let store = open_state(config)?;
    print_json(&serde_json::json!({
        "conflicts": store.detect_conflicts(),
        "consistency": store.consistency_status(),
    }))
}
