//! Built-in field catalog
//!
//! Maps the field names users put in the configuration (`SRTT`, `DAddr`,
//! `Task`, ...) to the kernel location each one is read from. Most fields
//! read the same member for both address families; the addresses do not.

use sockprobe_common::{constants::*, Family, FieldDescriptor};

use crate::types::Kind;

/// Where one catalog field is read from for one family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Source {
    pub c_field: &'static str,
    pub c_type: &'static str,
    pub ds: &'static str,
    pub dsnp: bool,
    pub func: Option<&'static str>,
    pub kind: Kind,
}

impl Source {
    const fn new(c_field: &'static str, c_type: &'static str, ds: &'static str, dsnp: bool) -> Self {
        Self {
            c_field,
            c_type,
            ds,
            dsnp,
            func: None,
            kind: Kind::Number,
        }
    }

    const fn func(mut self, func: &'static str) -> Self {
        self.func = Some(func);
        self
    }

    const fn kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// Base descriptor, before any per-field configuration is applied
    pub fn descriptor(&self) -> FieldDescriptor {
        let mut field = FieldDescriptor::new(self.c_field, self.c_type, self.ds, self.dsnp);
        field.func = self.func.map(str::to_string);
        field
    }
}

/// A named catalog field
#[derive(Clone, Copy, Debug)]
pub struct Entry {
    pub name: &'static str,
    pub inet4: Source,
    pub inet6: Source,
    pub help: &'static str,
}

impl Entry {
    pub fn source(&self, family: Family) -> &Source {
        match family {
            Family::Inet4 => &self.inet4,
            Family::Inet6 => &self.inet6,
        }
    }
}

const fn both(name: &'static str, source: Source, help: &'static str) -> Entry {
    Entry {
        name,
        inet4: source,
        inet6: source,
        help,
    }
}

const fn tcp(c_field: &'static str, c_type: &'static str) -> Source {
    Source::new(c_field, c_type, DS_TCP_INFO, false)
}

const fn icsk(c_field: &'static str, c_type: &'static str) -> Source {
    Source::new(c_field, c_type, DS_ICSK, false)
}

const fn common(c_field: &'static str, c_type: &'static str) -> Source {
    Source::new(c_field, c_type, DS_SOCK_COMMON, true)
}

const fn args(c_field: &'static str, c_type: &'static str) -> Source {
    Source::new(c_field, c_type, DS_ARGS, false)
}

static ENTRIES: &[Entry] = &[
    // struct tcp_sock
    both("SRTT", tcp("srtt_us", "u32"), "smoothed round trip time, us << 3"),
    both("RTTVar", tcp("mdev_us", "u32"), "medium deviation of the rtt, us << 2"),
    both("AdvMSS", tcp("advmss", "u16"), "advertised MSS"),
    both("ReordSeen", tcp("reord_seen", "u32"), "number of reordering events"),
    both("SndCwnd", tcp("snd_cwnd", "u32"), "sending congestion window"),
    both("SndSsThresh", tcp("snd_ssthresh", "u32"), "slow start threshold"),
    both("TotalRetrans", tcp("total_retrans", "u32"), "total retransmits for the connection"),
    both("SegsIn", tcp("segs_in", "u32"), "segments received"),
    both("SegsOut", tcp("segs_out", "u32"), "segments sent"),
    both("DataSegsIn", tcp("data_segs_in", "u32"), "data segments received"),
    both("DataSegsOut", tcp("data_segs_out", "u32"), "data segments sent"),
    both("BytesReceived", tcp("bytes_received", "u64"), "bytes received"),
    both("BytesSent", tcp("bytes_sent", "u64"), "bytes sent, retransmits included"),
    both("BytesAcked", tcp("bytes_acked", "u64"), "bytes acknowledged"),
    both("Delivered", tcp("delivered", "u32"), "packets delivered"),
    both("LostOut", tcp("lost_out", "u32"), "packets lost"),
    both("RetransOut", tcp("retrans_out", "u32"), "retransmitted packets out"),
    // struct inet_connection_sock
    both("RTO", icsk("icsk_rto", "u32"), "retransmit timeout, jiffies"),
    both("Retransmits", icsk("icsk_retransmits", "u8"), "unrecovered RTO timeouts"),
    both("Backoff", icsk("icsk_backoff", "u8"), "exponential backoff"),
    both("CAState", icsk("icsk_ca_state", "u8"), "congestion control state"),
    // struct sock_common
    Entry {
        name: "SAddr",
        inet4: common("skc_rcv_saddr", "u32").kind(Kind::Ipv4),
        inet6: common(FIELD_V6_RCV_SADDR, "unsigned __int128").kind(Kind::Ipv6),
        help: "local address",
    },
    Entry {
        name: "DAddr",
        inet4: common("skc_daddr", "u32").kind(Kind::Ipv4),
        inet6: common(FIELD_V6_DADDR, "unsigned __int128").kind(Kind::Ipv6),
        help: "remote address",
    },
    both("DPort", common("skc_dport", "u16").func("ntohs"), "remote port"),
    both("LPort", common("skc_num", "u16"), "local port"),
    both("State", common("skc_state", "u8"), "socket state"),
    // tracepoint arguments
    both("OldState", args("oldstate", "int"), "previous state, inet_sock_set_state only"),
    both("NewState", args("newstate", "int"), "new state, inet_sock_set_state only"),
    // current task
    both(
        "PID",
        Source::new("pid", "u32", HELPER_CURRENT_PID_TGID, false),
        "process id of the current task",
    ),
    both(
        "Task",
        Source::new(FIELD_CURRENT_COMM, "char", HELPER_CURRENT_COMM, false).kind(Kind::Text),
        "command of the current task",
    ),
];

/// Look up a catalog field by its configured name
pub fn lookup(name: &str) -> Option<&'static Entry> {
    ENTRIES.iter().find(|e| e.name == name)
}

/// Every catalog field, in declaration order
pub fn entries() -> &'static [Entry] {
    ENTRIES
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_unique() {
        let names: HashSet<_> = entries().iter().map(|e| e.name).collect();
        assert_eq!(names.len(), entries().len());
    }

    #[test]
    fn test_addresses_differ_per_family() {
        let daddr = lookup("DAddr").unwrap();

        assert_eq!(daddr.source(Family::Inet4).c_field, "skc_daddr");
        assert_eq!(daddr.source(Family::Inet4).kind, Kind::Ipv4);
        assert!(daddr.source(Family::Inet6).descriptor().is_ipv6_address());
        assert_eq!(daddr.source(Family::Inet6).kind, Kind::Ipv6);
    }

    #[test]
    fn test_helper_fields() {
        let task = lookup("Task").unwrap().source(Family::Inet4).descriptor();
        assert!(task.is_current_comm());
        assert!(task.ds_kind().is_helper());

        let pid = lookup("PID").unwrap().source(Family::Inet6).descriptor();
        assert!(pid.ds_kind().is_helper());
    }

    #[test]
    fn test_port_wrapper() {
        let dport = lookup("DPort").unwrap().source(Family::Inet4).descriptor();
        assert_eq!(dport.func.as_deref(), Some("ntohs"));
        assert!(dport.dsnp);
    }

    #[test]
    fn test_unknown() {
        assert!(lookup("srtt").is_none());
    }
}
