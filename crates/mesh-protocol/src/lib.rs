//! Mesh protocol - wire envelope types and shared primitives
//!
//! Defines the framed text protocol envelope used for remote method calls
//! between agents, the standard error-code table, and the value checksums
//! used for replica divergence detection.

pub mod checksum;
pub mod constants;
pub mod envelope;

pub use checksum::*;
pub use constants::*;
pub use envelope::*;
