//! Tracepoint probe source generator
//!
//! Renders a [`ProbeSpec`] into BCC C source for one tracepoint probe.
//! The generated program reads the requested socket fields into a
//! per-family record and submits it on a per-family perf channel.
//!
//! ## Architecture
//!
//! ```text
//! ProbeSpec -> maps::declare      sample table, record struct, perf channel
//!                                 (per non-empty family)
//!           -> handlers::entry    sk_trace<suffix>(args)
//!                |-- expr::build          member = (read expression) umath;
//!                |-- helpers::*           comm / pid / IPv6 address copy
//!                |-- filter guards        if (filter) { return 0; }
//!                `-- sampling::emit       per-socket 1-in-N gate
//! ```
//!
//! Rendering is pure: the same spec always yields byte-identical source, and
//! it never fails. Malformed field text surfaces when the source is compiled.

use log::debug;
use sockprobe_common::{Family, ProbeSpec};

pub mod expr;
pub mod handlers;
pub mod helpers;
pub mod maps;
pub mod sampling;
pub mod symbols;
pub mod writer;

pub use sampling::{BoundedSampleTable, SampleGate, SampleTable};
pub use symbols::Symbols;

use writer::SourceWriter;

const INCLUDES: [&str; 3] = [
    "#include <net/sock.h>",
    "#include <bcc/proto.h>",
    "#include <linux/tcp.h>",
];

/// Rendered probe together with the names a loader needs
#[derive(Clone, Debug)]
pub struct ProbeSource {
    /// Complete C source
    pub text: String,
    /// Names of the generated symbols
    pub symbols: Symbols,
    /// Families with a record struct and output channel
    pub families: Vec<Family>,
}

impl ProbeSource {
    /// Output channel name per emitted family
    pub fn channels(&self) -> Vec<(Family, String)> {
        self.families
            .iter()
            .map(|f| (*f, self.symbols.channel(*f)))
            .collect()
    }
}

/// Render the probe source for `spec`
pub fn render(spec: &ProbeSpec) -> String {
    let symbols = Symbols::new(spec.suffix.clone());
    let mut w = SourceWriter::new();

    for include in INCLUDES {
        w.line(include);
    }
    w.blank();

    for family in Family::ALL {
        maps::declare(&mut w, spec, &symbols, family);
    }

    handlers::entry(&mut w, spec, &symbols);

    w.finish()
}

/// Render `spec` and keep the generated symbol names alongside
pub fn synthesize(spec: &ProbeSpec) -> ProbeSource {
    let text = render(spec);
    let source = ProbeSource {
        text,
        symbols: Symbols::new(spec.suffix.clone()),
        families: spec.families(),
    };

    debug!(
        "Rendered {} for {} ({} bytes, channels: {:?})",
        source.symbols.entry(),
        spec.tracepoint,
        source.text.len(),
        source.channels()
    );

    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockprobe_common::{FieldDescriptor, TcpState, Tracepoint};

    fn srtt_spec() -> ProbeSpec {
        let mut spec = ProbeSpec::new("", Tracepoint::inet_sock_set_state());
        spec.tcp_info = true;
        spec.fields4 = vec![FieldDescriptor::new("srtt", "u32", "tcpi", false).with_math(">>3")];
        spec
    }

    fn dual_spec() -> ProbeSpec {
        let mut spec = ProbeSpec::new("_1", Tracepoint::inet_sock_set_state());
        spec.tcp_info = true;
        spec.fields4 = vec![
            FieldDescriptor::new("srtt_us", "u32", "tcpi", false).with_math(">>3"),
            FieldDescriptor::new("skc_daddr", "u32", "sk->__sk_common", true),
            FieldDescriptor::new("current_comm", "char", "bpf_get_current_comm", false),
            FieldDescriptor::new("pid", "u32", "bpf_get_current_pid_tgid", false),
        ];
        spec.fields6 = vec![
            FieldDescriptor::new("srtt_us", "u32", "tcpi", false).with_math(">>3"),
            FieldDescriptor::new("skc_v6_daddr", "unsigned __int128", "sk->__sk_common", true),
            FieldDescriptor::new("current_comm", "char", "bpf_get_current_comm", false),
            FieldDescriptor::new("pid", "u32", "bpf_get_current_pid_tgid", false),
        ];
        spec
    }

    /// Text of the branch for `family`, up to its closing brace
    fn branch_of(src: &str, family: Family) -> &str {
        let start = src
            .find(&format!("if (family == {}) {{", family.af()))
            .expect("branch present");
        let end = src[start..].find("\n\t}\n").expect("branch closed") + start;
        &src[start..end]
    }

    #[test]
    fn test_srtt_end_to_end() {
        let src = render(&srtt_spec());

        assert_eq!(src.matches("struct ipv4_data_t {").count(), 1);
        assert_eq!(src.matches("BPF_PERF_OUTPUT(").count(), 1);
        assert!(src.contains("BPF_PERF_OUTPUT(ipv4_events);"));
        assert!(src.contains("struct tcp_sock *tcpi = tcp_sk(sk);"));
        assert!(src.contains("data4.srtt0 = (tcpi->srtt>>3) ;"));
        assert!(src.contains("ipv4_events.perf_submit(args, &data4, sizeof(data4));"));
        assert!(!src.contains("ipv6"));
        assert!(!src.contains("AF_INET6"));
        assert!(!src.contains("data6"));
        assert!(!src.contains("BPF_HASH"));
        assert!(!src.contains("inet_csk"));
    }

    #[test]
    fn test_deterministic() {
        let spec = dual_spec();
        assert_eq!(render(&spec), render(&spec));
        assert_eq!(render(&spec), synthesize(&spec).text);
    }

    #[test]
    fn test_empty_ipv4_omitted() {
        let mut spec = dual_spec();
        spec.fields4.clear();
        let src = render(&spec);

        assert!(!src.contains("ipv4_"));
        assert!(!src.contains("(family == AF_INET)"));
        assert!(src.contains("if (family == AF_INET6) {"));
        assert!(src.contains("BPF_PERF_OUTPUT(ipv6_events_1);"));
    }

    #[test]
    fn test_entry_signature_and_fallthrough() {
        let src = render(&dual_spec());

        assert!(src.contains("int sk_trace_1(struct tracepoint__sock__inet_sock_set_state* args)\n{"));
        assert!(src.trim_end().ends_with("return 0;\n}"));
    }

    #[test]
    fn test_state_guard() {
        let mut spec = dual_spec();
        let src = render(&spec);
        assert!(src.contains("if (args->protocol != IPPROTO_TCP) { return 0; }"));
        assert!(!src.contains("args->newstate"));

        spec.tcp_state = TcpState::Close;
        let src = render(&spec);
        assert!(src.contains("if (args->newstate != TCP_CLOSE) { return 0; }"));
    }

    #[test]
    fn test_other_tracepoint_has_no_state_guard() {
        let mut spec = dual_spec();
        spec.tracepoint = "tcp:tcp_retransmit_skb".parse().unwrap();
        spec.tcp_state = TcpState::Established;
        let src = render(&spec);

        assert!(src.contains("struct tracepoint__tcp__tcp_retransmit_skb* args"));
        assert!(!src.contains("IPPROTO_TCP"));
        assert!(!src.contains("newstate"));
    }

    #[test]
    fn test_extended_structures() {
        let mut spec = dual_spec();
        spec.tcp_info = false;
        spec.icsk = true;
        let src = render(&spec);

        assert!(!src.contains("tcp_sk(sk)"));
        assert!(src.contains("struct inet_connection_sock *icsk = inet_csk(sk);"));
    }

    #[test]
    fn test_current_comm_is_array_at_any_index() {
        let src = render(&dual_spec());

        assert!(src.contains("\tchar current_comm[TASK_COMM_LEN];"));
        assert!(!src.contains("current_comm2"));
        assert!(src.contains("bpf_get_current_comm(&data4.current_comm, sizeof(data4.current_comm));"));
        assert!(src.contains("bpf_get_current_comm(&data6.current_comm, sizeof(data6.current_comm));"));
    }

    #[test]
    fn test_helpers_bypass_expression_builder() {
        let src = render(&dual_spec());

        assert!(!src.contains("bpf_get_current_comm->"));
        assert!(!src.contains("bpf_get_current_pid_tgid->"));
        assert!(src.contains("data4.pid3 = bpf_get_current_pid_tgid() >> 32;"));
        assert!(src.contains("data6.pid3 = bpf_get_current_pid_tgid() >> 32;"));
    }

    #[test]
    fn test_unknown_helper_emits_nothing() {
        let mut spec = srtt_spec();
        spec.fields4
            .push(FieldDescriptor::new("ts", "u64", "bpf_ktime_get_ns", false));
        let src = render(&spec);

        assert!(src.contains("\tu64 ts1;"));
        assert!(!src.contains("data4.ts1"));
    }

    #[test]
    fn test_ipv6_addresses_use_safe_copy() {
        let src = render(&dual_spec());
        let v6 = branch_of(&src, Family::Inet6);

        assert!(v6.contains(
            "bpf_probe_read(&data6.skc_v6_daddr1, sizeof(data6.skc_v6_daddr1), \
             sk->__sk_common.skc_v6_daddr.in6_u.u6_addr32);"
        ));
        assert!(!v6.contains("data6.skc_v6_daddr1 = ("));
        assert!(src.contains("\tunsigned __int128 skc_v6_daddr1;"));
    }

    #[test]
    fn test_filter_between_reads_and_submit() {
        let mut spec = dual_spec();
        spec.fields4[0] = spec.fields4[0].clone().with_filter("data4.srtt_us0 < 1000");
        spec.sample = 5;
        let src = render(&spec);
        let v4 = branch_of(&src, Family::Inet4);

        let guard = v4.find("if (data4.srtt_us0 < 1000) { return 0; }").unwrap();
        let last_read = v4.find("data4.pid3 = bpf_get_current_pid_tgid() >> 32;").unwrap();
        let sampling = v4.find("lookup_or_try_init").unwrap();
        let submit = v4.find("perf_submit").unwrap();

        assert!(last_read < guard);
        assert!(guard < sampling);
        assert!(sampling < submit);

        // only the filtered family gets a guard
        assert!(!branch_of(&src, Family::Inet6).contains("< 1000"));
    }

    #[test]
    fn test_sampling_gating() {
        let mut spec = dual_spec();
        spec.sample = 25;
        let src = render(&spec);

        for family in Family::ALL {
            let table = Symbols::new("_1").sample_table(family);
            let branch = branch_of(&src, family);

            assert!(src.contains(&format!("BPF_HASH({table}, struct sock *, u64, 100000);")));
            assert!(branch.contains(&format!("count = {table}.lookup_or_try_init(&sk, &zero);")));
            assert!(branch.contains("if (*count < 25) {"));
            assert!(branch.contains(&format!("{table}.increment(sk);")));

            let delete = branch.find(&format!("{table}.delete(&sk);")).unwrap();
            assert!(delete < branch.find("perf_submit").unwrap());
        }

        spec.sample = 0;
        let src = render(&spec);
        assert!(!src.contains("BPF_HASH"));
        assert!(!src.contains("lookup_or_try_init"));
        assert!(!src.contains("*count"));
        assert!(!src.contains(".delete("));
    }

    #[test]
    fn test_repeated_field_gets_distinct_members() {
        let mut spec = ProbeSpec::new("_0", Tracepoint::inet_sock_set_state());
        spec.tcp_info = true;
        spec.fields4 = vec![
            FieldDescriptor::new("srtt_us", "u32", "tcpi", false),
            FieldDescriptor::new("srtt_us", "u32", "tcpi", false).with_math(">>3"),
        ];
        let src = render(&spec);

        assert!(src.contains("\tu32 srtt_us0;\n\tu32 srtt_us1;"));
        assert!(src.contains("data4.srtt_us0 = (tcpi->srtt_us) ;"));
        assert!(src.contains("data4.srtt_us1 = (tcpi->srtt_us>>3) ;"));
    }

    #[test]
    fn test_channels() {
        let source = synthesize(&dual_spec());

        assert_eq!(
            source.channels(),
            vec![
                (Family::Inet4, "ipv4_events_1".to_string()),
                (Family::Inet6, "ipv6_events_1".to_string()),
            ]
        );
    }
}
