//! sockprobe userspace library
//!
//! Turns a YAML configuration into generated socket probes, loads them and
//! ships the records they emit to the configured egresses.

pub mod catalog;
pub mod collector;
pub mod config;
pub mod egress;
pub mod events;
pub mod exporter;
pub mod layout;
pub mod loader;
pub mod types;

pub use collector::{CollectorStats, RecordCollector};
pub use config::{Config, ProbePlan};
pub use events::EventReader;
pub use exporter::{InfluxExporter, JsonExporter, RecordExporter};
pub use layout::RecordLayout;
pub use loader::{CommandCompiler, PrebuiltObjects, ProbeCompiler, ProbeLoader};
pub use types::*;
