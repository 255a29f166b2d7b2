//! Per-family declarations
//!
//! Emits, for one address family, the sampling table (when sampling is on),
//! the record struct and the perf output channel the record is submitted on.

use sockprobe_common::{Family, FieldDescriptor, ProbeSpec, SAMPLE_TABLE_CAPACITY};

use crate::{symbols::Symbols, writer::SourceWriter};

/// Emit every declaration `family` needs; nothing when it has no fields
pub fn declare(w: &mut SourceWriter, spec: &ProbeSpec, symbols: &Symbols, family: Family) {
    if spec.fields(family).is_empty() {
        return;
    }

    if spec.is_sampled() {
        declare_sample_table(w, symbols, family);
    }
    declare_struct(w, spec, symbols, family);
    declare_channel(w, symbols, family);
    w.blank();
}

/// Socket-keyed counter table backing the 1-in-N sampler
fn declare_sample_table(w: &mut SourceWriter, symbols: &Symbols, family: Family) {
    w.line(format!(
        "BPF_HASH({}, struct sock *, u64, {});",
        symbols.sample_table(family),
        SAMPLE_TABLE_CAPACITY
    ));
}

fn declare_struct(w: &mut SourceWriter, spec: &ProbeSpec, symbols: &Symbols, family: Family) {
    w.open(format!("struct {} {{", symbols.data_struct(family)));
    for (index, field) in spec.fields(family).iter().enumerate() {
        w.line(member(field, index));
    }
    w.close("};");
}

fn declare_channel(w: &mut SourceWriter, symbols: &Symbols, family: Family) {
    w.line(format!("BPF_PERF_OUTPUT({});", symbols.channel(family)));
}

/// Member declaration; the task command is always a fixed-size array
fn member(field: &FieldDescriptor, index: usize) -> String {
    if field.is_current_comm() {
        format!("{} {}[TASK_COMM_LEN];", field.c_type, field.member_name(index))
    } else {
        format!("{} {};", field.c_type, field.member_name(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockprobe_common::Tracepoint;

    fn spec() -> ProbeSpec {
        let mut spec = ProbeSpec::new("_0", Tracepoint::inet_sock_set_state());
        spec.fields4 = vec![
            FieldDescriptor::new("srtt_us", "u32", "tcpi", false),
            FieldDescriptor::new("current_comm", "char", "bpf_get_current_comm", false),
        ];
        spec
    }

    #[test]
    fn test_struct_layout() {
        let spec = spec();
        let mut w = SourceWriter::new();
        declare(&mut w, &spec, &Symbols::new("_0"), Family::Inet4);
        let out = w.finish();

        assert!(out.contains("struct ipv4_data_0_t {\n\tu32 srtt_us0;\n\tchar current_comm[TASK_COMM_LEN];\n};"));
        assert!(out.contains("BPF_PERF_OUTPUT(ipv4_events_0);"));
        assert!(!out.contains("BPF_HASH"));
    }

    #[test]
    fn test_sample_table_when_sampled() {
        let mut spec = spec();
        spec.sample = 10;
        let mut w = SourceWriter::new();
        declare(&mut w, &spec, &Symbols::new("_0"), Family::Inet4);

        assert!(w
            .finish()
            .starts_with("BPF_HASH(ipv4_sample_0, struct sock *, u64, 100000);\n"));
    }

    #[test]
    fn test_empty_family_declares_nothing() {
        let spec = spec();
        let mut w = SourceWriter::new();
        declare(&mut w, &spec, &Symbols::new("_0"), Family::Inet6);

        assert!(w.finish().is_empty());
    }
}
