//! RPC service - remote method calls between agents.
//!
//! Accepts and executes method calls over a framed text protocol,
//! optionally wrapped in TLS. Dispatch itself is synchronous; the
//! listener is the one genuinely concurrent piece of the coordination
//! layer: a cancellable acceptor loop plus one task per connection.

pub mod client;
pub mod framing;
pub mod listener;
pub mod service;

pub use client::call_remote;
pub use framing::Framing;
pub use listener::{ListenerConfig, ListenerError, TlsConfig};
pub use service::{CallRecord, CallStats, HandlerError, MethodStats, RpcService};
