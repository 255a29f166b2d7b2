//! Probe definition
//!
//! One [`ProbeSpec`] describes one generated probe instance: the tracepoint
//! it attaches to, the fields it extracts per address family and the
//! probe-wide options.
//!
//! `suffix` is threaded through every generated symbol so several instances
//! can share one loaded program image. It must be unique among concurrently
//! loaded instances; nothing here checks that.

use crate::{
    field::FieldDescriptor,
    types::{Family, TcpState, Tracepoint},
};

/// One probe instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeSpec {
    /// Uniquifier for struct tags, channel, table and function names
    pub suffix: String,
    /// Target tracepoint
    pub tracepoint: Tracepoint,
    /// New-state filter, only meaningful for `sock:inet_sock_set_state`
    pub tcp_state: TcpState,
    /// Bind `struct tcp_sock *tcpi`
    pub tcp_info: bool,
    /// Bind `struct inet_connection_sock *icsk`
    pub icsk: bool,
    /// IPv4 fields in member order
    pub fields4: Vec<FieldDescriptor>,
    /// IPv6 fields in member order
    pub fields6: Vec<FieldDescriptor>,
    /// Emit 1 in `sample` events per socket; 0 disables sampling
    pub sample: u64,
}

impl ProbeSpec {
    /// An empty spec for `tracepoint`
    pub fn new(suffix: impl Into<String>, tracepoint: Tracepoint) -> Self {
        Self {
            suffix: suffix.into(),
            tracepoint,
            tcp_state: TcpState::All,
            tcp_info: false,
            icsk: false,
            fields4: Vec::new(),
            fields6: Vec::new(),
            sample: 0,
        }
    }

    /// Field list for `family`
    pub fn fields(&self, family: Family) -> &[FieldDescriptor] {
        match family {
            Family::Inet4 => &self.fields4,
            Family::Inet6 => &self.fields6,
        }
    }

    /// Families with at least one field, in emission order
    pub fn families(&self) -> Vec<Family> {
        Family::ALL
            .into_iter()
            .filter(|f| !self.fields(*f).is_empty())
            .collect()
    }

    pub fn is_sampled(&self) -> bool {
        self.sample != 0
    }
}
