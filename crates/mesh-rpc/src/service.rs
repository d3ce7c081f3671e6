use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesh_journal::{Journal, JournalError};
use mesh_protocol::{
    EnvelopeError, RpcRequest, RpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR,
};

/// How a handler reports failure. Anything else it returns goes back to
/// the caller as the result value.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The supplied arguments were wrong (missing, mistyped).
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// Any other handler fault.
    #[error("{0}")]
    Internal(String),
}

pub type Handler = Box<
    dyn Fn(&serde_json::Map<String, serde_json::Value>) -> Result<serde_json::Value, HandlerError>
        + Send
        + Sync,
>;

/// One executed (or attempted) call. Append-only; never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub request_id: String,
    pub method: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_secs: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-method aggregates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodStats {
    pub count: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_secs: f64,
    pub average_secs: f64,
}

/// Aggregate call statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStats {
    pub agent_id: String,
    pub total_calls: usize,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub average_secs: f64,
    pub methods: HashMap<String, MethodStats>,
}

struct CallLog {
    records: HashMap<String, CallRecord>,
    journal: Journal,
}

/// Shared service core. Connection handler tasks hold this behind an
/// `Arc`; the routing table and call log are the only state touched
/// concurrently, each behind its own lock.
pub(crate) struct ServiceInner {
    agent_id: String,
    methods: RwLock<HashMap<String, Handler>>,
    calls: Mutex<CallLog>,
}

impl ServiceInner {
    /// Parse, validate, dispatch, respond. Never panics and never
    /// propagates handler faults; every failure becomes a structured
    /// wire error.
    pub(crate) fn handle_request(&self, raw: &str) -> String {
        let request = match RpcRequest::parse(raw) {
            Ok(r) => r,
            Err(EnvelopeError::Malformed(msg)) => {
                return RpcResponse::error(None, PARSE_ERROR, format!("Parse error: {msg}"))
                    .to_wire();
            }
            Err(EnvelopeError::Invalid { reason, id }) => {
                return RpcResponse::error(id, INVALID_REQUEST, format!("Invalid request: {reason}"))
                    .to_wire();
            }
        };

        let request_id = request
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let started = Instant::now();

        let outcome = {
            let methods = self.methods.read().unwrap_or_else(|e| e.into_inner());
            match methods.get(&request.method) {
                Some(handler) => Some(handler(&request.params)),
                None => None,
            }
        };
        let duration_secs = started.elapsed().as_secs_f64();

        let (response, error_text) = match outcome {
            None => (
                RpcResponse::error(
                    Some(request_id.clone()),
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", request.method),
                ),
                Some(format!("Method not found: {}", request.method)),
            ),
            Some(Ok(result)) => (
                RpcResponse::success(Some(request_id.clone()), result),
                None,
            ),
            Some(Err(HandlerError::InvalidParams(msg))) => {
                let text = format!("Invalid params: {msg}");
                (
                    RpcResponse::error(Some(request_id.clone()), INVALID_PARAMS, text.clone()),
                    Some(text),
                )
            }
            Some(Err(HandlerError::Internal(msg))) => {
                let text = format!("Server error: {msg}");
                (
                    RpcResponse::error(Some(request_id.clone()), INTERNAL_ERROR, text.clone()),
                    Some(text),
                )
            }
        };

        self.record_call(CallRecord {
            request_id,
            method: request.method,
            agent_id: self.agent_id.clone(),
            timestamp: Utc::now(),
            duration_secs,
            success: error_text.is_none(),
            error: error_text,
        });

        response.to_wire()
    }

    fn record_call(&self, record: CallRecord) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = calls.journal.append(&record) {
            tracing::error!(error = %e, "failed to append call record");
        }
        calls.records.insert(record.request_id.clone(), record);
    }
}

/// Executes remote method calls and records their outcomes.
pub struct RpcService {
    pub(crate) inner: Arc<ServiceInner>,
    pub(crate) listener: Mutex<Option<crate::listener::ListenerHandle>>,
}

impl RpcService {
    /// Open the service for `agent_id`, replaying its call journal under
    /// `data_dir`.
    pub fn open(agent_id: &str, data_dir: &Path) -> Result<Self, JournalError> {
        let journal = Journal::open(data_dir.join(format!("{agent_id}_calls.jsonl")))?;

        let mut records = HashMap::new();
        for record in journal.load_all::<CallRecord>()? {
            records.insert(record.request_id.clone(), record);
        }

        tracing::info!(agent_id = %agent_id, calls = records.len(), "rpc service opened");
        Ok(Self {
            inner: Arc::new(ServiceInner {
                agent_id: agent_id.to_string(),
                methods: RwLock::new(HashMap::new()),
                calls: Mutex::new(CallLog { records, journal }),
            }),
            listener: Mutex::new(None),
        })
    }

    pub fn agent_id(&self) -> String {
        self.inner.agent_id.clone()
    }

    /// Add a handler to the routing table. Re-registering a name
    /// replaces the previous handler.
    pub fn register_method(
        &self,
        name: &str,
        handler: impl Fn(&serde_json::Map<String, serde_json::Value>) -> Result<serde_json::Value, HandlerError>
            + Send
            + Sync
            + 'static,
    ) {
        let mut methods = self
            .inner
            .methods
            .write()
            .unwrap_or_else(|e| e.into_inner());
        methods.insert(name.to_string(), Box::new(handler));
        tracing::debug!(method = %name, "rpc method registered");
    }

    /// Handle one raw request and produce the raw response text.
    pub fn handle_request(&self, raw: &str) -> String {
        self.inner.handle_request(raw)
    }

    pub fn call(&self, request_id: &str) -> Option<CallRecord> {
        let calls = self.inner.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.records.get(request_id).cloned()
    }

    /// Most recent calls, newest first.
    pub fn recent_calls(&self, limit: usize) -> Vec<CallRecord> {
        let calls = self.inner.calls.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<CallRecord> = calls.records.values().cloned().collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        records
    }

    pub fn call_statistics(&self) -> CallStats {
        let calls = self.inner.calls.lock().unwrap_or_else(|e| e.into_inner());

        let mut methods: HashMap<String, MethodStats> = HashMap::new();
        let mut total_secs = 0.0;
        let mut successful = 0usize;
        for record in calls.records.values() {
            let stats = methods.entry(record.method.clone()).or_default();
            stats.count += 1;
            if record.success {
                stats.successful += 1;
                successful += 1;
            } else {
                stats.failed += 1;
            }
            stats.total_secs += record.duration_secs;
            total_secs += record.duration_secs;
        }
        for stats in methods.values_mut() {
            stats.average_secs = stats.total_secs / stats.count as f64;
        }

        let total = calls.records.len();
        CallStats {
            agent_id: self.inner.agent_id.clone(),
            total_calls: total,
            successful_calls: successful,
            failed_calls: total - successful,
            average_secs: if total > 0 {
                total_secs / total as f64
            } else {
                0.0
            },
            methods,
        }
    }
}
