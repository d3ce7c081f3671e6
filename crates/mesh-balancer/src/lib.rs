//! Load balancer - task distribution across agents.
//!
//! Picks an agent for a task from a caller-supplied candidate list using a
//! selectable strategy, and tracks per-agent load and performance from
//! completion reports. Candidates come from outside (typically a registry
//! query); the balancer holds no roster of its own.

pub mod balancer;
pub mod strategy;

pub use balancer::{AgentLoad, Candidate, LoadBalancer, LoadStats, TaskAssignment};
pub use strategy::Strategy;
