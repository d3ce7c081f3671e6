use serde::{Deserialize, Serialize};

/// Selection strategy for task assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Stateful cyclic pointer over the candidate list.
    RoundRobin,
    /// Uniform pick.
    Random,
    /// Minimum current active-task count.
    LeastLoaded,
    /// Probability proportional to the supplied per-candidate weight.
    Weighted,
    /// Maximize `performance_score * (1 - active_tasks / 10)`.
    PerformanceBased,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::Random => "random",
            Strategy::LeastLoaded => "least_loaded",
            Strategy::Weighted => "weighted",
            Strategy::PerformanceBased => "performance_based",
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Strategy::RoundRobin),
            "random" => Ok(Strategy::Random),
            "least_loaded" => Ok(Strategy::LeastLoaded),
            "weighted" => Ok(Strategy::Weighted),
            "performance_based" => Ok(Strategy::PerformanceBased),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
