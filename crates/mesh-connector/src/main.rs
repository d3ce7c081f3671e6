//! mesh-connector - command surface for the agentmesh coordination layer.
//!
//! Each subcommand is a thin pass-through to one coordination operation:
//! roster management, remote calls, task assignment, failure reporting,
//! and shared state. `serve` runs the RPC listener with the coordination
//! methods registered so remote callers get the same surface.

mod commands;
mod config;
mod methods;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::ConnectorConfig;

#[derive(Parser)]
#[command(name = "mesh-connector", version, about = "Coordination layer for cooperating agents")]
struct Cli {
    /// Config file path (defaults to the user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register an agent in the roster and print its id.
    Register {
        name: String,
        host: String,
        port: u16,
        /// Comma-separated capability tags.
        #[arg(long, value_delimiter = ',')]
        capabilities: Vec<String>,
    },
    /// Remove an agent and every peer link pointing at it.
    Deregister { agent_id: String },
    /// List agents, optionally filtered by capability.
    Agents { capability: Option<String> },
    /// Record a liveness heartbeat for an agent.
    Heartbeat { agent_id: String },
    /// Link two agents as peers.
    Connect { a: String, b: String },
    /// Print a topology snapshot (demotes stale agents first).
    Topology,
    /// Print roster statistics.
    Stats,
    /// Invoke a method on a running listener.
    Call {
        method: String,
        /// Params as a JSON object.
        #[arg(default_value = "{}")]
        params: String,
        /// Listener address, host:port.
        #[arg(long)]
        addr: Option<String>,
        /// "newline" or "length_prefixed".
        #[arg(long)]
        framing: Option<String>,
    },
    /// Run the RPC listener with the coordination methods registered.
    Serve,
    /// Assign a task to one of the comma-separated candidate agents.
    Assign {
        task_id: String,
        /// Comma-separated agent ids.
        candidates: String,
        #[arg(long, default_value = "least_loaded")]
        strategy: String,
    },
    /// Report the outcome of an assigned task.
    Complete {
        task_id: String,
        #[arg(long, default_value_t = 0.0)]
        duration: f64,
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        error: Option<String>,
    },
    /// Print load-balancing statistics.
    Load,
    /// Report an agent failure to the circuit breakers.
    Fail {
        agent_id: String,
        #[arg(default_value = "error")]
        error_type: String,
        #[arg(default_value = "")]
        message: String,
    },
    /// Print breaker health, for one agent or the whole roster.
    Health { agent_id: Option<String> },
    /// Set a state key to a JSON value.
    Set { key: String, value: String },
    /// Read one state key, or all keys.
    Get { key: Option<String> },
    /// Accept a versioned state write pushed by a peer.
    Sync {
        key: String,
        value: String,
        version: u64,
        source: String,
    },
    /// List detected replica conflicts and consistency figures.
    Conflicts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConnectorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Register {
            name,
            host,
            port,
            capabilities,
        } => commands::register(&config, &name, &host, port, capabilities),
        Command::Deregister { agent_id } => commands::deregister(&config, &agent_id),
        Command::Agents { capability } => commands::agents(&config, capability.as_deref()),
        Command::Heartbeat { agent_id } => commands::heartbeat(&config, &agent_id),
        Command::Connect { a, b } => commands::connect(&config, &a, &b),
        Command::Topology => commands::topology(&config),
        Command::Stats => commands::stats(&config),
        Command::Call {
            method,
            params,
            addr,
            framing,
        } => commands::call(&config, &method, &params, addr.as_deref(), framing.as_deref()).await,
        Command::Serve => commands::serve(&config).await,
        Command::Assign {
            task_id,
            candidates,
            strategy,
        } => commands::assign(&config, &task_id, &candidates, &strategy),
        Command::Complete {
            task_id,
            duration,
            failed,
            error,
        } => commands::complete(&config, &task_id, duration, !failed, error),
        Command::Load => commands::load(&config),
        Command::Fail {
            agent_id,
            error_type,
            message,
        } => commands::fail(&config, &agent_id, &error_type, &message),
        Command::Health { agent_id } => commands::health(&config, agent_id.as_deref()),
        Command::Set { key, value } => commands::set(&config, &key, &value),
        Command::Get { key } => commands::get(&config, key.as_deref()),
        Command::Sync {
            key,
            value,
            version,
            source,
        } => commands::sync(&config, &key, &value, version, &source),
        Command::Conflicts => commands::conflicts(&config),
    }
}
