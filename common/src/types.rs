//! Shared vocabulary types
//!
//! Address families, tracepoint identifiers, TCP states and the closed set
//! of kernel helpers the generator knows how to call.

use crate::constants::*;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Socket address family a probe branch handles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    /// `AF_INET`
    Inet4,
    /// `AF_INET6`
    Inet6,
}

impl Family {
    /// Both families, in emission order
    pub const ALL: [Family; 2] = [Family::Inet4, Family::Inet6];

    /// Digit used in generated local names (`data4`, `data6`)
    pub fn marker(self) -> u8 {
        match self {
            Family::Inet4 => 4,
            Family::Inet6 => 6,
        }
    }

    /// Kernel address family constant
    pub fn af(self) -> &'static str {
        match self {
            Family::Inet4 => "AF_INET",
            Family::Inet6 => "AF_INET6",
        }
    }

    /// Prefix of every per-family symbol
    pub fn prefix(self) -> &'static str {
        match self {
            Family::Inet4 => "ipv4",
            Family::Inet6 => "ipv6",
        }
    }

    /// Map a configured family number (4 or 6)
    pub fn from_marker(marker: u8) -> Result<Self> {
        match marker {
            4 => Ok(Family::Inet4),
            6 => Ok(Family::Inet6),
            other => bail!("unknown address family {other}, expected 4 or 6"),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Kernel tracepoint identifier
///
/// Accepts both the tracefs spelling (`sock:inet_sock_set_state`) and the
/// BCC spelling (`sock__inet_sock_set_state`). Displays as the latter since
/// that is what the generated argument struct is named after.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tracepoint {
    pub category: String,
    pub name: String,
}

impl Tracepoint {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    /// `sock:inet_sock_set_state`
    pub fn inet_sock_set_state() -> Self {
        Self::new(TP_SOCK_CATEGORY, TP_INET_SOCK_SET_STATE)
    }

    pub fn is_inet_sock_set_state(&self) -> bool {
        self.category == TP_SOCK_CATEGORY && self.name == TP_INET_SOCK_SET_STATE
    }
}

impl FromStr for Tracepoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (category, name) = match s.split_once(':') {
            Some(parts) => parts,
            None => match s.split_once("__") {
                Some(parts) => parts,
                None => bail!("invalid tracepoint '{s}', expected category:name"),
            },
        };

        if category.is_empty() || name.is_empty() {
            bail!("invalid tracepoint '{s}', expected category:name");
        }

        Ok(Self::new(category, name))
    }
}

impl TryFrom<String> for Tracepoint {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Tracepoint> for String {
    fn from(tp: Tracepoint) -> Self {
        tp.to_string()
    }
}

impl fmt::Display for Tracepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}", self.category, self.name)
    }
}

/// New-state filter for the socket state change tracepoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TcpState {
    /// No filtering
    #[default]
    #[serde(rename = "TCP_ALL")]
    All,
    #[serde(rename = "TCP_ESTABLISHED")]
    Established,
    #[serde(rename = "TCP_SYN_SENT")]
    SynSent,
    #[serde(rename = "TCP_SYN_RECV")]
    SynRecv,
    #[serde(rename = "TCP_FIN_WAIT1")]
    FinWait1,
    #[serde(rename = "TCP_FIN_WAIT2")]
    FinWait2,
    #[serde(rename = "TCP_TIME_WAIT")]
    TimeWait,
    #[serde(rename = "TCP_CLOSE")]
    Close,
    #[serde(rename = "TCP_CLOSE_WAIT")]
    CloseWait,
    #[serde(rename = "TCP_LAST_ACK")]
    LastAck,
    #[serde(rename = "TCP_LISTEN")]
    Listen,
    #[serde(rename = "TCP_CLOSING")]
    Closing,
    #[serde(rename = "TCP_NEW_SYN_RECV")]
    NewSynRecv,
}

impl TcpState {
    /// Kernel constant name
    pub fn as_str(self) -> &'static str {
        match self {
            TcpState::All => "TCP_ALL",
            TcpState::Established => "TCP_ESTABLISHED",
            TcpState::SynSent => "TCP_SYN_SENT",
            TcpState::SynRecv => "TCP_SYN_RECV",
            TcpState::FinWait1 => "TCP_FIN_WAIT1",
            TcpState::FinWait2 => "TCP_FIN_WAIT2",
            TcpState::TimeWait => "TCP_TIME_WAIT",
            TcpState::Close => "TCP_CLOSE",
            TcpState::CloseWait => "TCP_CLOSE_WAIT",
            TcpState::LastAck => "TCP_LAST_ACK",
            TcpState::Listen => "TCP_LISTEN",
            TcpState::Closing => "TCP_CLOSING",
            TcpState::NewSynRecv => "TCP_NEW_SYN_RECV",
        }
    }

    pub fn is_all(self) -> bool {
        self == TcpState::All
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel helpers with a dedicated emission path
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Helper {
    /// `bpf_get_current_comm(&dst, sizeof(dst))`
    CurrentComm,
    /// `bpf_get_current_pid_tgid() >> 32`
    CurrentPidTgid,
}

impl Helper {
    pub fn name(self) -> &'static str {
        match self {
            Helper::CurrentComm => HELPER_CURRENT_COMM,
            Helper::CurrentPidTgid => HELPER_CURRENT_PID_TGID,
        }
    }
}

/// Classification of a descriptor's data source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DsKind {
    /// A local binding read through the expression builder
    Binding,
    /// A helper the generator emits a dedicated call for
    Helper(Helper),
    /// Helper namespace but not a helper we know; produces no statement
    UnknownHelper,
}

impl DsKind {
    pub fn classify(ds: &str) -> Self {
        match ds {
            HELPER_CURRENT_COMM => DsKind::Helper(Helper::CurrentComm),
            HELPER_CURRENT_PID_TGID => DsKind::Helper(Helper::CurrentPidTgid),
            other if other.starts_with(HELPER_PREFIX) => DsKind::UnknownHelper,
            _ => DsKind::Binding,
        }
    }

    pub fn is_helper(self) -> bool {
        !matches!(self, DsKind::Binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracepoint_spellings() {
        let a: Tracepoint = "sock:inet_sock_set_state".parse().unwrap();
        let b: Tracepoint = "sock__inet_sock_set_state".parse().unwrap();

        assert_eq!(a, b);
        assert!(a.is_inet_sock_set_state());
        assert_eq!(a.to_string(), "sock__inet_sock_set_state");
    }

    #[test]
    fn test_tracepoint_invalid() {
        assert!("inet_sock_set_state".parse::<Tracepoint>().is_err());
        assert!(":foo".parse::<Tracepoint>().is_err());

        let tp: Tracepoint = "tcp:tcp_retransmit_skb".parse().unwrap();
        assert!(!tp.is_inet_sock_set_state());
    }

    #[test]
    fn test_ds_classification() {
        assert_eq!(
            DsKind::classify("bpf_get_current_comm"),
            DsKind::Helper(Helper::CurrentComm)
        );
        assert_eq!(
            DsKind::classify("bpf_get_current_pid_tgid"),
            DsKind::Helper(Helper::CurrentPidTgid)
        );
        assert_eq!(DsKind::classify("bpf_ktime_get_ns"), DsKind::UnknownHelper);
        assert_eq!(DsKind::classify("tcpi"), DsKind::Binding);
        assert!(!DsKind::classify("sk->__sk_common").is_helper());
    }

    #[test]
    fn test_family() {
        assert_eq!(Family::from_marker(4).unwrap(), Family::Inet4);
        assert_eq!(Family::Inet6.af(), "AF_INET6");
        assert!(Family::from_marker(5).is_err());
    }

    #[test]
    fn test_tcp_state_display() {
        assert_eq!(TcpState::default(), TcpState::All);
        assert_eq!(TcpState::Close.to_string(), "TCP_CLOSE");
    }
}
