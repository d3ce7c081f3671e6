//! State synchronizer - loosely consistent shared key/value state.
//!
//! Each agent holds an authoritative local map plus version and checksum
//! bookkeeping per key. Writes from peers are accepted only when they
//! carry a strictly newer version (stale writes are silently rejected),
//! and the last value each peer pushed is tracked as a replica so
//! divergence can be detected by checksum without re-reading peers.
//!
//! All mutation goes through `&mut self`, so local writes to a key are
//! single-writer serialized by construction and a key's version never
//! decreases. Callers that share a store across threads wrap it in a
//! mutex.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesh_journal::{Journal, JournalError};
use mesh_protocol::value_checksum;

/// Append-only ledger entry for one state write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub change_id: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
    pub key: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: serde_json::Value,
    pub propagated: bool,
    #[serde(default)]
    pub replicas: Vec<String>,
}

/// Version bookkeeping for one key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVersion {
    pub key: String,
    /// Monotonically increasing under local writes.
    pub current_version: u64,
    pub last_modified: DateTime<Utc>,
    pub modified_by: String,
    pub value: serde_json::Value,
    pub checksum: String,
}

/// One detected divergence between the local value and a replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConflict {
    pub key: String,
    pub local_version: u64,
    pub local_value: Option<serde_json::Value>,
    pub replica_agent: String,
    pub replica_value: serde_json::Value,
}

/// Aggregate consistency figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyStatus {
    pub agent_id: String,
    pub total_keys: usize,
    pub fully_synced_keys: usize,
    pub partially_synced_keys: usize,
    pub consistency_percentage: f64,
    pub total_changes: usize,
    pub propagated_changes: usize,
    pub replica_count: usize,
}

/// Versioned key/value store with replica tracking.
pub struct StateStore {
    agent_id: String,
    values: HashMap<String, serde_json::Value>,
    versions: HashMap<String, StateVersion>,
    changes: HashMap<String, StateChange>,
    /// agent id -> last value that agent pushed for each key.
    replicas: HashMap<String, HashMap<String, serde_json::Value>>,
    journal: Journal,
}

impl StateStore {
    /// Open the store for `agent_id`, replaying its change ledger under
    /// `data_dir` to rebuild the live map and version table.
    pub fn open(agent_id: &str, data_dir: &Path) -> Result<Self, JournalError> {
        let journal = Journal::open(data_dir.join(format!("{agent_id}_changes.jsonl")))?;

        let mut values = HashMap::new();
        let mut versions: HashMap<String, StateVersion> = HashMap::new();
        let mut changes = HashMap::new();
        for change in journal.load_all::<StateChange>()? {
            values.insert(change.key.clone(), change.new_value.clone());
            versions.insert(
                change.key.clone(),
                StateVersion {
                    key: change.key.clone(),
                    current_version: change.version,
                    last_modified: change.timestamp,
                    modified_by: change.agent_id.clone(),
                    value: change.new_value.clone(),
                    checksum: value_checksum(&change.new_value),
                },
            );
            changes.insert(change.change_id.clone(), change);
        }

        tracing::info!(agent_id = %agent_id, keys = values.len(), "state store opened");
        Ok(Self {
            agent_id: agent_id.to_string(),
            values,
            versions,
            changes,
            replicas: HashMap::new(),
            journal,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Authoritative local write: bump the key's version, record the
    /// change, update the live map. Returns the change id.
    pub fn set(&mut self, key: &str, value: serde_json::Value) -> String {
        let change_id = uuid::Uuid::new_v4().to_string();
        let old_value = self.values.get(key).cloned();
        let now = Utc::now();

        let version = self
            .versions
            .entry(key.to_string())
            .or_insert_with(|| StateVersion {
                key: key.to_string(),
                current_version: 0,
                last_modified: now,
                modified_by: String::new(),
                value: serde_json::Value::Null,
                checksum: String::new(),
            });
        version.current_version += 1;
        version.last_modified = now;
        version.modified_by = self.agent_id.clone();
        version.value = value.clone();
        version.checksum = value_checksum(&value);
        let new_version = version.current_version;

        let change = StateChange {
            change_id: change_id.clone(),
            agent_id: self.agent_id.clone(),
            timestamp: now,
            version: new_version,
            key: key.to_string(),
            old_value,
            new_value: value.clone(),
            propagated: false,
            replicas: Vec::new(),
        };
        if let Err(e) = self.journal.append(&change) {
            tracing::error!(error = %e, "failed to append state change");
        }
        self.changes.insert(change_id.clone(), change);
        self.values.insert(key.to_string(), value);

        tracing::debug!(key = %key, version = new_version, "state updated");
        change_id
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn get_all(&self) -> &HashMap<String, serde_json::Value> {
        &self.values
    }

    /// Accept a write pushed by another agent.
    ///
    /// Applied only when `version` is strictly newer than the local
    /// version for the key; a stale write is a strict no-op returning
    /// `false`. On acceptance the source agent's replica entry records
    /// the pushed value.
    pub fn sync(
        &mut self,
        key: &str,
        value: serde_json::Value,
        version: u64,
        source_agent: &str,
    ) -> bool {
        if let Some(local) = self.versions.get(key) {
            if version <= local.current_version {
                tracing::debug!(
                    key = %key,
                    incoming = version,
                    local = local.current_version,
                    "rejected stale state sync"
                );
                return false;
            }
        }

        self.set(key, value.clone());
        self.replicas
            .entry(source_agent.to_string())
            .or_default()
            .insert(key.to_string(), value);

        tracing::info!(key = %key, version, source = %source_agent, "state synced");
        true
    }

    /// Record which agents now hold a change. Bookkeeping only.
    pub fn mark_propagated(&mut self, change_id: &str, agent_ids: Vec<String>) -> bool {
        let change = match self.changes.get_mut(change_id) {
            Some(c) => c,
            None => return false,
        };
        change.propagated = true;
        change.replicas = agent_ids;

        if let Err(e) = self.journal.append(&self.changes[change_id]) {
            tracing::error!(error = %e, "failed to append propagation update");
        }
        true
    }

    pub fn change(&self, change_id: &str) -> Option<&StateChange> {
        self.changes.get(change_id)
    }

    /// Most recent changes, newest first.
    pub fn recent_changes(&self, limit: usize) -> Vec<&StateChange> {
        let mut changes: Vec<&StateChange> = self.changes.values().collect();
        changes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        changes.truncate(limit);
        changes
    }

    pub fn version(&self, key: &str) -> Option<&StateVersion> {
        self.versions.get(key)
    }

    pub fn replica_state(&self, agent_id: &str) -> Option<&HashMap<String, serde_json::Value>> {
        self.replicas.get(agent_id)
    }

    /// Compare every tracked replica value against the local checksum.
    /// Detection only; nothing is merged.
    pub fn detect_conflicts(&self) -> Vec<StateConflict> {
        let mut conflicts = Vec::new();
        for (key, version) in &self.versions {
            for (agent_id, replica) in &self.replicas {
                if let Some(replica_value) = replica.get(key) {
                    if value_checksum(replica_value) != version.checksum {
                        conflicts.push(StateConflict {
                            key: key.clone(),
                            local_version: version.current_version,
                            local_value: self.values.get(key).cloned(),
                            replica_agent: agent_id.clone(),
                            replica_value: replica_value.clone(),
                        });
                    }
                }
            }
        }
        conflicts
    }

    /// Operator-driven conflict resolution: accept `value` as the new
    /// authoritative local state for `key`.
    pub fn resolve_conflict(&mut self, key: &str, value: serde_json::Value) -> String {
        let change_id = self.set(key, value);
        tracing::info!(key = %key, "conflict resolved by explicit overwrite");
        change_id
    }

    pub fn consistency_status(&self) -> ConsistencyStatus {
        let total_keys = self.values.len();
        let mut fully_synced = 0;
        let mut partially_synced = 0;

        for (key, version) in &self.versions {
            let matching = self
                .replicas
                .values()
                .filter(|replica| {
                    replica
                        .get(key)
                        .map(|v| value_checksum(v) == version.checksum)
                        .unwrap_or(false)
                })
                .count();

            if matching == self.replicas.len() {
                fully_synced += 1;
            } else if matching > 0 {
                partially_synced += 1;
            }
        }

        ConsistencyStatus {
            agent_id: self.agent_id.clone(),
            total_keys,
            fully_synced_keys: fully_synced,
            partially_synced_keys: partially_synced,
            consistency_percentage: if total_keys > 0 {
                fully_synced as f64 / total_keys as f64 * 100.0
            } else {
                100.0
            },
            total_changes: self.changes.len(),
            propagated_changes: self.changes.values().filter(|c| c.propagated).count(),
            replica_count: self.replicas.len(),
        }
    }
}
