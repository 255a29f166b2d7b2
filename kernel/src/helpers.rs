//! Kernel helper call statements
//!
//! Data sources the expression builder cannot express as a plain scalar
//! assignment: helpers taking a destination buffer, helpers whose result
//! needs shifting, and the IPv6 address words which have to be copied with
//! `bpf_probe_read`.

use sockprobe_common::{Family, FieldDescriptor, Helper};

use crate::symbols::Symbols;

/// Dedicated statement for a helper data source
pub fn helper_call(family: Family, index: usize, field: &FieldDescriptor, helper: Helper) -> String {
    let member = format!("{}.{}", Symbols::local(family), field.member_name(index));

    match helper {
        Helper::CurrentComm => format!("{}(&{member}, sizeof({member}));", helper.name()),
        Helper::CurrentPidTgid => format!("{member} = {}() >> 32;", helper.name()),
    }
}

/// Safe copy of an IPv6 address member out of the socket union
///
/// The address always lives in `struct sock_common`, which is reached by
/// value, so `dsnp` is not consulted.
pub fn ipv6_address_copy(family: Family, index: usize, field: &FieldDescriptor) -> String {
    let member = format!("{}.{}", Symbols::local(family), field.member_name(index));

    format!(
        "bpf_probe_read(&{member}, sizeof({member}), {}.{}.in6_u.u6_addr32);",
        field.ds, field.c_field
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_comm() {
        let f = FieldDescriptor::new("current_comm", "char", "bpf_get_current_comm", false);

        assert_eq!(
            helper_call(Family::Inet4, 5, &f, Helper::CurrentComm),
            "bpf_get_current_comm(&data4.current_comm, sizeof(data4.current_comm));"
        );
    }

    #[test]
    fn test_current_pid() {
        let f = FieldDescriptor::new("pid", "u32", "bpf_get_current_pid_tgid", false);

        assert_eq!(
            helper_call(Family::Inet6, 2, &f, Helper::CurrentPidTgid),
            "data6.pid2 = bpf_get_current_pid_tgid() >> 32;"
        );
    }

    #[test]
    fn test_ipv6_address_copy() {
        let f = FieldDescriptor::new("skc_v6_daddr", "unsigned __int128", "sk->__sk_common", true);

        assert_eq!(
            ipv6_address_copy(Family::Inet6, 0, &f),
            "bpf_probe_read(&data6.skc_v6_daddr0, sizeof(data6.skc_v6_daddr0), \
             sk->__sk_common.skc_v6_daddr.in6_u.u6_addr32);"
        );
    }

    #[test]
    fn test_ipv6_address_copy_ignores_dsnp() {
        let f = FieldDescriptor::new("skc_v6_rcv_saddr", "unsigned __int128", "sk->__sk_common", false);

        assert_eq!(
            ipv6_address_copy(Family::Inet6, 3, &f),
            "bpf_probe_read(&data6.skc_v6_rcv_saddr3, sizeof(data6.skc_v6_rcv_saddr3), \
             sk->__sk_common.skc_v6_rcv_saddr.in6_u.u6_addr32);"
        );
    }
}
