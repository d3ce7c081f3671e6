use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use mesh_journal::{Journal, JournalError};

use crate::strategy::Strategy;

/// An assignable agent, as supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub agent_id: String,
    pub name: String,
}

/// One task handed to one agent. Completed exactly once; the task id is
/// never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: String,
    pub agent_id: String,
    pub strategy: Strategy,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Running load and performance figures for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoad {
    pub agent_id: String,
    pub name: String,
    pub active_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub total_duration_secs: f64,
    pub average_duration_secs: f64,
    /// completed / (completed + failed); 1.0 before any completion.
    pub performance_score: f64,
}

impl AgentLoad {
    fn new(agent_id: &str, name: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            name: name.to_string(),
            active_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            total_duration_secs: 0.0,
            average_duration_secs: 0.0,
            performance_score: 1.0,
        }
    }
}

/// Aggregate balancer statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadStats {
    pub total_agents: usize,
    pub total_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub average_load: f64,
    pub agents: HashMap<String, AgentLoad>,
}

/// Distributes tasks across agents and tracks the outcomes.
pub struct LoadBalancer {
    assignments: HashMap<String, TaskAssignment>,
    loads: HashMap<String, AgentLoad>,
    round_robin_cursor: usize,
    journal: Journal,
}

impl LoadBalancer {
    /// Open the balancer, replaying the assignment journal under
    /// `data_dir`. Replay is last-record-wins per task id, so a
    /// completion appended after an assignment supersedes it. Load
    /// counters are runtime state and start fresh.
    pub fn open(data_dir: &Path) -> Result<Self, JournalError> {
        let journal = Journal::open(data_dir.join("assignments.jsonl"))?;

        let mut assignments = HashMap::new();
        for record in journal.load_all::<TaskAssignment>()? {
            assignments.insert(record.task_id.clone(), record);
        }

        tracing::info!(assignments = assignments.len(), "load balancer opened");
        Ok(Self {
            assignments,
            loads: HashMap::new(),
            round_robin_cursor: 0,
            journal,
        })
    }

    /// Pick an agent for `task_id` from `candidates`.
    ///
    /// Returns `None` on an empty candidate list, a reused task id, or
    /// when no candidate scores above zero under `performance_based`.
    pub fn assign_task(
        &mut self,
        task_id: &str,
        candidates: &[Candidate],
        strategy: Strategy,
        weights: Option<&HashMap<String, f64>>,
    ) -> Option<Candidate> {
        if candidates.is_empty() {
            return None;
        }
        if self.assignments.contains_key(task_id) {
            tracing::warn!(task_id = %task_id, "task id already assigned, refusing reuse");
            return None;
        }

        let selected = match strategy {
            Strategy::RoundRobin => self.pick_round_robin(candidates),
            Strategy::Random => {
                Some(candidates[rand::thread_rng().gen_range(0..candidates.len())].clone())
            }
            Strategy::LeastLoaded => self.pick_least_loaded(candidates),
            Strategy::Weighted => self.pick_weighted(candidates, weights),
            Strategy::PerformanceBased => self.pick_performance_based(candidates),
        }?;

        let assignment = TaskAssignment {
            task_id: task_id.to_string(),
            agent_id: selected.agent_id.clone(),
            strategy,
            assigned_at: Utc::now(),
            completed_at: None,
            duration_secs: 0.0,
            success: false,
            result: None,
            error: None,
        };
        if let Err(e) = self.journal.append(&assignment) {
            tracing::error!(error = %e, "failed to append assignment");
        }
        self.assignments.insert(task_id.to_string(), assignment);

        self.loads
            .entry(selected.agent_id.clone())
            .or_insert_with(|| AgentLoad::new(&selected.agent_id, &selected.name))
            .active_tasks += 1;

        tracing::info!(
            task_id = %task_id,
            agent_id = %selected.agent_id,
            strategy = %strategy,
            "task assigned"
        );
        Some(selected)
    }

    /// Report the outcome of an assigned task.
    ///
    /// A no-op returning `false` for unknown or already-completed ids;
    /// otherwise updates the assignment, the agent's counters, and the
    /// derived performance score.
    pub fn complete_task(
        &mut self,
        task_id: &str,
        duration_secs: f64,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        let assignment = match self.assignments.get_mut(task_id) {
            Some(a) if a.completed_at.is_none() => a,
            _ => return false,
        };

        assignment.completed_at = Some(Utc::now());
        assignment.duration_secs = duration_secs;
        assignment.success = success;
        assignment.result = result;
        assignment.error = error;

        if let Some(load) = self.loads.get_mut(&assignment.agent_id) {
            load.active_tasks = load.active_tasks.saturating_sub(1);
            if success {
                load.completed_tasks += 1;
            } else {
                load.failed_tasks += 1;
            }
            load.total_duration_secs += duration_secs;
            let finished = load.completed_tasks + load.failed_tasks;
            load.average_duration_secs = load.total_duration_secs / finished as f64;
            load.performance_score = load.completed_tasks as f64 / finished as f64;
        }

        if let Err(e) = self.journal.append(&self.assignments[task_id]) {
            tracing::error!(error = %e, "failed to append completion");
        }
        true
    }

    pub fn assignment(&self, task_id: &str) -> Option<&TaskAssignment> {
        self.assignments.get(task_id)
    }

    pub fn agent_load(&self, agent_id: &str) -> Option<&AgentLoad> {
        self.loads.get(agent_id)
    }

    pub fn load_statistics(&self) -> LoadStats {
        let active_tasks: usize = self.loads.values().map(|l| l.active_tasks).sum();
        let completed_tasks: u64 = self.loads.values().map(|l| l.completed_tasks).sum();
        let failed_tasks: u64 = self.loads.values().map(|l| l.failed_tasks).sum();
        let average_load = if self.loads.is_empty() {
            0.0
        } else {
            active_tasks as f64 / self.loads.len() as f64
        };

        LoadStats {
            total_agents: self.loads.len(),
            total_tasks: self.assignments.len(),
            active_tasks,
            completed_tasks,
            failed_tasks,
            average_load,
            agents: self.loads.clone(),
        }
    }

    fn pick_round_robin(&mut self, candidates: &[Candidate]) -> Option<Candidate> {
        let selected = candidates[self.round_robin_cursor % candidates.len()].clone();
        self.round_robin_cursor += 1;
        Some(selected)
    }

    fn pick_least_loaded(&self, candidates: &[Candidate]) -> Option<Candidate> {
        candidates
            .iter()
            .min_by_key(|c| {
                self.loads
                    .get(&c.agent_id)
                    .map(|l| l.active_tasks)
                    .unwrap_or(0)
            })
            .cloned()
    }

    fn pick_weighted(
        &self,
        candidates: &[Candidate],
        weights: Option<&HashMap<String, f64>>,
    ) -> Option<Candidate> {
        let weight_of = |c: &Candidate| -> f64 {
            weights
                .and_then(|w| w.get(&c.agent_id).copied())
                .unwrap_or(1.0)
                .max(0.0)
        };

        let total: f64 = candidates.iter().map(weight_of).sum();
        if total <= 0.0 {
            return Some(candidates[0].clone());
        }

        let mut roll = rand::thread_rng().gen_range(0.0..total);
        for candidate in candidates {
            let w = weight_of(candidate);
            if roll < w {
                return Some(candidate.clone());
            }
            roll -= w;
        }
        candidates.last().cloned()
    }

    fn pick_performance_based(&self, candidates: &[Candidate]) -> Option<Candidate> {
        let mut best: Option<(&Candidate, f64)> = None;
        for candidate in candidates {
            let (score, active) = self
                .loads
                .get(&candidate.agent_id)
                .map(|l| (l.performance_score, l.active_tasks))
                .unwrap_or((1.0, 0));
            let weighted = score * (1.0 - active as f64 / 10.0);
            if weighted > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((candidate, weighted));
            }
        }
        best.map(|(c, _)| c.clone())
    }
}
