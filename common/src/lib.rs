//! Probe definition model
//!
//! Data types shared between the probe source generator and the userspace
//! agent that loads the generated probes and decodes their records.

pub mod constants;
pub mod field;
pub mod spec;
pub mod types;

// Re-export commonly used types
pub use constants::*;
pub use field::FieldDescriptor;
pub use spec::ProbeSpec;
pub use types::{DsKind, Family, Helper, TcpState, Tracepoint};
