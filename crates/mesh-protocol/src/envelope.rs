use serde::{Deserialize, Serialize};

use crate::constants::PROTOCOL_VERSION;

/// A remote method call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub protocol_version: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl RpcRequest {
    pub fn new(method: &str, params: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Parse raw request text into a validated envelope.
    ///
    /// Distinguishes two failure classes so callers can map them to the
    /// right wire error: text that is not JSON at all, and JSON that is
    /// not a structurally valid request (wrong version, missing method).
    /// The latter carries any `id` found so the error response can echo it.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        let obj = match value.as_object() {
            Some(o) => o,
            None => {
                return Err(EnvelopeError::Invalid {
                    reason: "request is not an object".to_string(),
                    id: None,
                })
            }
        };

        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        match obj.get("protocol_version").and_then(|v| v.as_str()) {
            Some(PROTOCOL_VERSION) => {}
            _ => {
                return Err(EnvelopeError::Invalid {
                    reason: format!("protocol_version must be \"{}\"", PROTOCOL_VERSION),
                    id,
                })
            }
        }

        let method = match obj.get("method").and_then(|v| v.as_str()) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => {
                return Err(EnvelopeError::Invalid {
                    reason: "missing method".to_string(),
                    id,
                })
            }
        };

        let params = match obj.get("params") {
            None => serde_json::Map::new(),
            Some(serde_json::Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(EnvelopeError::Invalid {
                    reason: "params must be an object".to_string(),
                    id,
                })
            }
        };

        Ok(Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            method,
            params,
            id,
        })
    }
}

/// A response envelope. Exactly one of `result` and `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub protocol_version: String,
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: Option<String>, result: serde_json::Value) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: i32, message: String) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcErrorObject { code, message }),
        }
    }

    /// Serialize to wire text. The envelope types contain nothing that can
    /// fail to serialize, so this is infallible.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"protocol_version\":\"{}\",\"id\":null,\"error\":{{\"code\":{},\"message\":\"encode failure\"}}}}",
                PROTOCOL_VERSION,
                crate::constants::INTERNAL_ERROR,
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
}

/// Why raw request text could not be turned into an [`RpcRequest`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("parse error: {0}")]
    Malformed(String),
    #[error("invalid request: {reason}")]
    Invalid { reason: String, id: Option<String> },
}
