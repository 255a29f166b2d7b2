//! Shared constants for generated probes
//!
//! These values are baked into the generated probe source and are also
//! needed by userspace to decode the records the probe emits.

// ============================================================================
// Kernel Limits
// ============================================================================

/// Length of the task command array (`TASK_COMM_LEN` in linux/sched.h)
pub const TASK_COMM_LEN: usize = 16;

/// Capacity of each per-family sampling table
pub const SAMPLE_TABLE_CAPACITY: u32 = 100_000;

// ============================================================================
// Data Sources
// ============================================================================

/// Prefix shared by every kernel helper data source
pub const HELPER_PREFIX: &str = "bpf_";

/// Helper returning the current task command string
pub const HELPER_CURRENT_COMM: &str = "bpf_get_current_comm";

/// Helper returning `tgid << 32 | pid` of the current task
pub const HELPER_CURRENT_PID_TGID: &str = "bpf_get_current_pid_tgid";

/// Local binding holding the `struct tcp_sock *`
pub const DS_TCP_INFO: &str = "tcpi";

/// Local binding holding the `struct inet_connection_sock *`
pub const DS_ICSK: &str = "icsk";

/// The socket common header, accessed by value
pub const DS_SOCK_COMMON: &str = "sk->__sk_common";

/// The tracepoint argument record
pub const DS_ARGS: &str = "args";

// ============================================================================
// Reserved Members
// ============================================================================

/// Member filled by `bpf_get_current_comm`, always a `TASK_COMM_LEN` array
pub const FIELD_CURRENT_COMM: &str = "current_comm";

/// IPv6 destination address in `struct sock_common`
pub const FIELD_V6_DADDR: &str = "skc_v6_daddr";

/// IPv6 receive/bind address in `struct sock_common`
pub const FIELD_V6_RCV_SADDR: &str = "skc_v6_rcv_saddr";

// ============================================================================
// Tracepoints
// ============================================================================

/// Category of the socket state change tracepoint
pub const TP_SOCK_CATEGORY: &str = "sock";

/// Name of the socket state change tracepoint
pub const TP_INET_SOCK_SET_STATE: &str = "inet_sock_set_state";

/// Suffix prepended to the tracepoint index when none is configured
pub const DEFAULT_SUFFIX_PREFIX: &str = "_";
