//! Generated symbol names
//!
//! Every name that appears in the generated probe and that could clash
//! between two loaded instances is derived here from the instance suffix.

use sockprobe_common::Family;

/// Symbol names for one probe instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbols {
    suffix: String,
}

impl Symbols {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    /// Struct tag of the per-family record (`ipv4_data_0_t`)
    pub fn data_struct(&self, family: Family) -> String {
        format!("{}_data{}_t", family.prefix(), self.suffix)
    }

    /// Per-family perf output channel (`ipv4_events_0`)
    pub fn channel(&self, family: Family) -> String {
        format!("{}_events{}", family.prefix(), self.suffix)
    }

    /// Per-family sampling table (`ipv4_sample_0`)
    pub fn sample_table(&self, family: Family) -> String {
        format!("{}_sample{}", family.prefix(), self.suffix)
    }

    /// Probe entry function (`sk_trace_0`)
    pub fn entry(&self) -> String {
        format!("sk_trace{}", self.suffix)
    }

    /// Local record variable inside a branch (`data4`)
    pub fn local(family: Family) -> String {
        format!("data{}", family.marker())
    }
}
