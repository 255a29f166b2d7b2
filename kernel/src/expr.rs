//! Field read expressions
//!
//! Turns one descriptor into the assignment statement that fills its struct
//! member. The text of `ds`, `func`, `math` and `umath` is used verbatim;
//! malformed input yields malformed C that the compiler rejects later.

use sockprobe_common::{FieldDescriptor, Family};

use crate::symbols::Symbols;

/// Read expression for `field`, with its wrapper and trailing math applied
///
/// ```text
/// ds->c_field            (dsnp = false)
/// ds.c_field             (dsnp = true)
/// func(ds->c_field)math
/// ```
pub fn read_expr(field: &FieldDescriptor) -> String {
    let mut expr = access(&field.ds, field.dsnp, &field.c_field);

    if let Some(func) = field.func.as_deref().filter(|f| !f.is_empty()) {
        expr = format!("{func}({expr})");
    }

    if let Some(math) = field.math.as_deref() {
        expr.push_str(math);
    }

    expr
}

/// Assignment statement for the member at `index`
///
/// The parenthesized term is the computed expression; `c_type` is only used
/// for the member declaration and is not applied as a cast here.
pub fn build(family: Family, index: usize, field: &FieldDescriptor) -> String {
    format!(
        "{}.{}{} = ({}) {};",
        Symbols::local(family),
        field.c_field,
        index,
        read_expr(field),
        field.umath.as_deref().unwrap_or(""),
    )
}

/// `ds.member` or `ds->member`
fn access(ds: &str, by_value: bool, member: &str) -> String {
    if by_value {
        format!("{ds}.{member}")
    } else {
        format!("{ds}->{member}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_access_with_math() {
        let f = FieldDescriptor::new("srtt", "u32", "tcpi", false).with_math(">>3");

        assert_eq!(build(Family::Inet4, 0, &f), "data4.srtt0 = (tcpi->srtt>>3) ;");
    }

    #[test]
    fn test_value_access() {
        let f = FieldDescriptor::new("skc_daddr", "u32", "sk->__sk_common", true);

        assert_eq!(
            build(Family::Inet4, 2, &f),
            "data4.skc_daddr2 = (sk->__sk_common.skc_daddr) ;"
        );
    }

    #[test]
    fn test_func_math_umath() {
        let f = FieldDescriptor::new("skc_dport", "u16", "sk->__sk_common", true)
            .with_func("ntohs")
            .with_math(" & 0xffff")
            .with_umath("+ 1");

        assert_eq!(
            build(Family::Inet6, 1, &f),
            "data6.skc_dport1 = (ntohs(sk->__sk_common.skc_dport) & 0xffff) + 1;"
        );
    }

    #[test]
    fn test_ctype_is_not_a_cast() {
        let f = FieldDescriptor::new("total_retrans", "u64", "tcpi", false);
        let stmt = build(Family::Inet4, 0, &f);

        assert!(!stmt.contains("u64"));
        assert_eq!(stmt, "data4.total_retrans0 = (tcpi->total_retrans) ;");
    }
}
