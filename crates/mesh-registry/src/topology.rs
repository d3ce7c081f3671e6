use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::AgentRecord;

/// A point-in-time snapshot of the agent network.
///
/// Derived from the roster on demand and logged for audit; never treated
/// as authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub timestamp: DateTime<Utc>,
    pub agents: HashMap<String, AgentRecord>,
    /// Adjacency map: agent id -> peer ids.
    pub connections: HashMap<String, BTreeSet<String>>,
    pub active_agents: Vec<String>,
    pub failed_agents: Vec<String>,
}

/// Aggregate roster statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub active_agents: usize,
    pub failed_agents: usize,
    /// Symmetric links counted once per endpoint.
    pub total_connections: usize,
    /// Capability name -> number of agents advertising it.
    pub capabilities: HashMap<String, usize>,
}
