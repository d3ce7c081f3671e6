//! Protocol-wide constants.

/// Version carried in every request and response envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Payload was not parseable as JSON.
pub const PARSE_ERROR: i32 = -32700;
/// Payload was JSON but not a valid request envelope.
pub const INVALID_REQUEST: i32 = -32600;
/// No handler registered under the requested method name.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// The handler rejected the supplied arguments.
pub const INVALID_PARAMS: i32 = -32602;
/// The handler failed for any other reason.
pub const INTERNAL_ERROR: i32 = -32603;
