use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesh_journal::{Journal, JournalError};

use crate::topology::{NetworkTopology, RegistryStats};

/// How long an agent may go without a heartbeat before a topology query
/// demotes it to failed.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Failed,
}

/// One registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Peer links are always symmetric: `b` appears here iff this agent
    /// appears in `b`'s peer set.
    #[serde(default)]
    pub peers: BTreeSet<String>,
}

/// Roster journal record. Replayed in order at startup; a deregistration
/// is an explicit tombstone rather than a forgotten row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum RosterEvent {
    Registered { record: AgentRecord },
    Deregistered { agent_id: String },
    Connected { a: String, b: String },
}

/// Tracks the agent roster and peer links.
pub struct AgentRegistry {
    agents: HashMap<String, AgentRecord>,
    heartbeat_timeout: chrono::Duration,
    roster: Journal,
    topology_log: Journal,
}

impl AgentRegistry {
    /// Open the registry, replaying the roster journal under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, JournalError> {
        Self::with_heartbeat_timeout(data_dir, DEFAULT_HEARTBEAT_TIMEOUT_SECS)
    }

    pub fn with_heartbeat_timeout(
        data_dir: &Path,
        heartbeat_timeout_secs: u64,
    ) -> Result<Self, JournalError> {
        let roster = Journal::open(data_dir.join("roster.jsonl"))?;
        let topology_log = Journal::open(data_dir.join("topology.jsonl"))?;

        let mut agents: HashMap<String, AgentRecord> = HashMap::new();
        for event in roster.load_all::<RosterEvent>()? {
            match event {
                RosterEvent::Registered { record } => {
                    agents.insert(record.agent_id.clone(), record);
                }
                RosterEvent::Deregistered { agent_id } => {
                    agents.remove(&agent_id);
                    for record in agents.values_mut() {
                        record.peers.remove(&agent_id);
                    }
                }
                RosterEvent::Connected { a, b } => {
                    if agents.contains_key(&a) && agents.contains_key(&b) {
                        if let Some(rec) = agents.get_mut(&a) {
                            rec.peers.insert(b.clone());
                        }
                        if let Some(rec) = agents.get_mut(&b) {
                            rec.peers.insert(a);
                        }
                    }
                }
            }
        }

        tracing::info!(agents = agents.len(), "agent registry opened");
        Ok(Self {
            agents,
            heartbeat_timeout: chrono::Duration::seconds(heartbeat_timeout_secs as i64),
            roster,
            topology_log,
        })
    }

    /// Register a new agent and return its fresh id.
    pub fn register(
        &mut self,
        name: &str,
        host: &str,
        port: u16,
        capabilities: Vec<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> String {
        let agent_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = AgentRecord {
            agent_id: agent_id.clone(),
            name: name.to_string(),
            host: host.to_string(),
            port,
            capabilities,
            status: AgentStatus::Active,
            registered_at: now,
            last_heartbeat: now,
            metadata,
            peers: BTreeSet::new(),
        };

        if let Err(e) = self.roster.append(&RosterEvent::Registered {
            record: record.clone(),
        }) {
            tracing::error!(error = %e, "failed to append roster record");
        }
        self.agents.insert(agent_id.clone(), record);

        tracing::info!(agent_id = %agent_id, name = %name, %host, port, "agent registered");
        agent_id
    }

    /// Remove an agent and every peer link pointing at it.
    pub fn deregister(&mut self, agent_id: &str) -> bool {
        let record = match self.agents.remove(agent_id) {
            Some(r) => r,
            None => return false,
        };

        for other in self.agents.values_mut() {
            other.peers.remove(agent_id);
        }
        if let Err(e) = self.roster.append(&RosterEvent::Deregistered {
            agent_id: agent_id.to_string(),
        }) {
            tracing::error!(error = %e, "failed to append roster tombstone");
        }

        tracing::info!(agent_id = %agent_id, name = %record.name, "agent deregistered");
        true
    }

    /// Record a liveness signal. A failed agent that heartbeats is
    /// re-activated here; this is the only path back to active.
    pub fn heartbeat(&mut self, agent_id: &str) -> bool {
        let record = match self.agents.get_mut(agent_id) {
            Some(r) => r,
            None => return false,
        };

        record.last_heartbeat = Utc::now();
        if record.status != AgentStatus::Active {
            record.status = AgentStatus::Active;
            tracing::info!(agent_id = %agent_id, name = %record.name, "agent recovered");
        }
        true
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentRecord> {
        self.agents.get(agent_id)
    }

    pub fn agents_by_capability(&self, capability: &str) -> Vec<&AgentRecord> {
        self.agents
            .values()
            .filter(|a| a.capabilities.iter().any(|c| c == capability))
            .collect()
    }

    /// Agents that are active and have a fresh heartbeat.
    pub fn active_agents(&self) -> Vec<&AgentRecord> {
        self.agents
            .values()
            .filter(|a| a.status == AgentStatus::Active && self.heartbeat_fresh(a))
            .collect()
    }

    /// Establish a symmetric peer link between two agents.
    pub fn connect(&mut self, a: &str, b: &str) -> bool {
        if !self.agents.contains_key(a) || !self.agents.contains_key(b) {
            return false;
        }

        if let Some(rec) = self.agents.get_mut(a) {
            rec.peers.insert(b.to_string());
        }
        if let Some(rec) = self.agents.get_mut(b) {
            rec.peers.insert(a.to_string());
        }
        if let Err(e) = self.roster.append(&RosterEvent::Connected {
            a: a.to_string(),
            b: b.to_string(),
        }) {
            tracing::error!(error = %e, "failed to append peer link");
        }

        tracing::info!(a = %a, b = %b, "agents connected");
        true
    }

    /// Resolved peer records for an agent.
    pub fn peers(&self, agent_id: &str) -> Vec<&AgentRecord> {
        match self.agents.get(agent_id) {
            Some(record) => record
                .peers
                .iter()
                .filter_map(|pid| self.agents.get(pid))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Compute a point-in-time topology snapshot.
    ///
    /// Active agents with stale heartbeats are demoted to failed first.
    /// The snapshot is appended to the audit journal but never replayed
    /// as authoritative state.
    pub fn topology(&mut self) -> NetworkTopology {
        let now = Utc::now();
        for record in self.agents.values_mut() {
            if record.status == AgentStatus::Active
                && now - record.last_heartbeat > self.heartbeat_timeout
            {
                record.status = AgentStatus::Failed;
                tracing::warn!(agent_id = %record.agent_id, name = %record.name, "heartbeat stale, agent demoted to failed");
            }
        }

        let active_agents: Vec<String> = self
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Active)
            .map(|a| a.agent_id.clone())
            .collect();
        let failed_agents: Vec<String> = self
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Failed)
            .map(|a| a.agent_id.clone())
            .collect();
        let connections = self
            .agents
            .values()
            .map(|a| (a.agent_id.clone(), a.peers.clone()))
            .collect();

        let snapshot = NetworkTopology {
            timestamp: now,
            agents: self.agents.clone(),
            connections,
            active_agents,
            failed_agents,
        };

        if let Err(e) = self.topology_log.append(&snapshot) {
            tracing::error!(error = %e, "failed to append topology snapshot");
        }
        snapshot
    }

    /// Aggregate roster statistics.
    pub fn statistics(&mut self) -> RegistryStats {
        let topology = self.topology();

        let mut capabilities: HashMap<String, usize> = HashMap::new();
        for agent in self.agents.values() {
            for cap in &agent.capabilities {
                *capabilities.entry(cap.clone()).or_insert(0) += 1;
            }
        }

        // Each symmetric link is stored on both endpoints.
        let total_connections: usize = self.agents.values().map(|a| a.peers.len()).sum();

        RegistryStats {
            total_agents: self.agents.len(),
            active_agents: topology.active_agents.len(),
            failed_agents: topology.failed_agents.len(),
            total_connections,
            capabilities,
        }
    }

    fn heartbeat_fresh(&self, record: &AgentRecord) -> bool {
        Utc::now() - record.last_heartbeat <= self.heartbeat_timeout
    }
}
