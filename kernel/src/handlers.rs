//! Probe entry function
//!
//! Emits `sk_trace<suffix>`, the tracepoint handler that binds the socket,
//! branches on its address family and fills, filters, samples and submits
//! the per-family record.

use sockprobe_common::{DsKind, Family, ProbeSpec};

use crate::{expr, helpers, sampling, symbols::Symbols, writer::SourceWriter};

/// Emit the whole entry function
pub fn entry(w: &mut SourceWriter, spec: &ProbeSpec, symbols: &Symbols) {
    w.line(format!(
        "int {}(struct tracepoint__{}* args)",
        symbols.entry(),
        spec.tracepoint
    ));
    w.open("{");

    if spec.tracepoint.is_inet_sock_set_state() {
        state_guard(w, spec);
    }

    w.line("struct sock *sk = (struct sock *)args->skaddr;");
    if spec.tcp_info {
        w.line("struct tcp_sock *tcpi = tcp_sk(sk);");
    }
    if spec.icsk {
        w.line("struct inet_connection_sock *icsk = inet_csk(sk);");
    }
    w.blank();
    w.line("u16 family = sk->__sk_common.skc_family;");
    w.blank();

    for family in spec.families() {
        branch(w, spec, symbols, family);
        w.blank();
    }

    w.line("return 0;");
    w.close("}");
}

/// Protocol and new-state checks of `sock:inet_sock_set_state`
fn state_guard(w: &mut SourceWriter, spec: &ProbeSpec) {
    w.line("if (args->protocol != IPPROTO_TCP) { return 0; }");
    if !spec.tcp_state.is_all() {
        w.line(format!(
            "if (args->newstate != {}) {{ return 0; }}",
            spec.tcp_state
        ));
    }
    w.blank();
}

/// One address family branch
///
/// Statement order inside the branch: field reads, helper calls, filter
/// guards, sampling, submit. Filters run before the sampling table is
/// touched so a filtered event never advances a socket's counter.
fn branch(w: &mut SourceWriter, spec: &ProbeSpec, symbols: &Symbols, family: Family) {
    let fields = spec.fields(family);
    let local = Symbols::local(family);

    w.open(format!("if (family == {}) {{", family.af()));
    w.line(format!("struct {} {local} = {{}};", symbols.data_struct(family)));

    for (index, field) in fields.iter().enumerate() {
        if family == Family::Inet6 && field.is_ipv6_address() {
            w.line(helpers::ipv6_address_copy(family, index, field));
        } else if !field.ds_kind().is_helper() {
            w.line(expr::build(family, index, field));
        }
    }

    for (index, field) in fields.iter().enumerate() {
        if family == Family::Inet6 && field.is_ipv6_address() {
            continue;
        }
        if let DsKind::Helper(helper) = field.ds_kind() {
            w.line(helpers::helper_call(family, index, field, helper));
        }
    }

    for field in fields {
        if let Some(filter) = field.filter() {
            w.line(format!("if ({filter}) {{ return 0; }}"));
        }
    }

    if spec.is_sampled() {
        sampling::emit(w, symbols, family, spec.sample);
    }

    w.line(format!(
        "{}.perf_submit(args, &{local}, sizeof({local}));",
        symbols.channel(family)
    ));
    w.line("return 0;");
    w.close("}");
}
