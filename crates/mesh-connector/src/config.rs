//! Connector configuration.
//!
//! Loaded from a TOML file; every field has a default so a missing file
//! just means defaults. The config path can be overridden per invocation
//! with `--config`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use mesh_recovery::RecoveryConfig;
use mesh_rpc::{Framing, ListenerConfig, TlsConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Identity this connector acts as (scopes the call and state logs).
    pub agent_id: String,
    /// Directory holding every component journal.
    pub data_dir: PathBuf,
    pub heartbeat_timeout_secs: u64,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub success_threshold: u32,
    pub max_retries: u32,
    pub listen: ListenSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenSection {
    pub host: String,
    pub port: u16,
    /// "newline" or "length_prefixed".
    pub framing: String,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            agent_id: "local".to_string(),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("agentmesh"),
            heartbeat_timeout_secs: mesh_registry::DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            failure_threshold: 5,
            reset_timeout_secs: 60,
            success_threshold: 3,
            max_retries: 3,
            listen: ListenSection::default(),
        }
    }
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7450,
            framing: "newline".to_string(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ConnectorConfig {
    /// Load from `path`, or from the default location when none is
    /// given. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        let config = toml::from_str(&text)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: chrono::Duration::seconds(self.reset_timeout_secs as i64),
            success_threshold: self.success_threshold,
            max_retries: self.max_retries,
        }
    }

    pub fn listener_config(&self) -> anyhow::Result<ListenerConfig> {
        let framing = Framing::from_str(&self.listen.framing)
            .map_err(|e| anyhow::anyhow!("listen.framing: {e}"))?;
        let tls = match (&self.listen.tls_cert, &self.listen.tls_key) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.clone(),
                key_path: key.clone(),
            }),
            (None, None) => None,
            _ => anyhow::bail!("listen.tls_cert and listen.tls_key must be set together"),
        };
        Ok(ListenerConfig {
            host: self.listen.host.clone(),
            port: self.listen.port,
            framing,
            tls,
        })
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentmesh")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = ConnectorConfig::load(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.agent_id, "local");
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.listen.port, 7450);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "agent_id = \"node-a\"\n\n[listen]\nframing = \"length_prefixed\"\n",
        )
        .unwrap();

        let config = ConnectorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.agent_id, "node-a");
        assert_eq!(config.listen.framing, "length_prefixed");
        assert_eq!(config.listen.port, 7450);
        assert_eq!(config.heartbeat_timeout_secs, 30);
    }

    #[test]
    fn test_tls_paths_must_pair() {
        let config = ConnectorConfig {
            listen: ListenSection {
                tls_cert: Some(PathBuf::from("cert.pem")),
                tls_key: None,
                ..ListenSection::default()
            },
            ..ConnectorConfig::default()
        };
        assert!(config.listener_config().is_err());
    }
}
