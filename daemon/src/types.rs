//! Userspace type definitions
//!
//! Records decoded from probe output are plain JSON objects keyed by the
//! configured field names, so every exporter and egress speaks the same
//! shape regardless of which fields a probe was generated with.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sockprobe_common::{FieldDescriptor, FIELD_CURRENT_COMM};

/// One decoded probe record
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Field added to every record with the unix time it was read
pub const TIMESTAMP_FIELD: &str = "Timestamp";

/// Field added to every record with the local hostname
pub const HOSTNAME_FIELD: &str = "Hostname";

/// How a raw member value is presented in a record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Integer, signedness taken from the C type
    #[default]
    Number,
    /// 4 bytes in network order, shown as dotted quad
    Ipv4,
    /// 16 bytes in network order, shown in RFC 5952 form
    Ipv6,
    /// NUL-terminated character array
    Text,
}

/// One member of a generated record struct as userspace sees it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordField {
    /// Name the value is published under
    pub name: String,
    /// Declared C type of the member
    pub c_type: String,
    /// Presentation of the value
    pub kind: Kind,
}

impl RecordField {
    pub fn new(name: impl Into<String>, c_type: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            c_type: c_type.into(),
            kind,
        }
    }

    /// Record field for the struct member generated from `descriptor`
    ///
    /// The task command member is always a `TASK_COMM_LEN` array, so its
    /// kind is forced to [`Kind::Text`]; no other member may claim it.
    pub fn for_member(
        name: impl Into<String>,
        descriptor: &FieldDescriptor,
        kind: Kind,
    ) -> Result<Self> {
        let kind = match (descriptor.is_current_comm(), kind) {
            (true, Kind::Number | Kind::Text) => Kind::Text,
            (true, other) => bail!("task command member cannot be shown as {other:?}"),
            (false, Kind::Text) => bail!(
                "only the {FIELD_CURRENT_COMM} member can be shown as text, not '{}'",
                descriptor.c_field
            ),
            (false, other) => other,
        };

        Ok(Self::new(name, &descriptor.c_type, kind))
    }
}

/// A record tagged with the probe it came from
#[derive(Clone, Debug)]
pub struct Event {
    /// Index of the probe in the configuration
    pub probe: usize,
    pub record: Record,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_member_is_text() {
        let comm = FieldDescriptor::new("current_comm", "char", "bpf_get_current_comm", false);

        let field = RecordField::for_member("Task", &comm, Kind::Number).unwrap();
        assert_eq!(field.kind, Kind::Text);
        assert!(RecordField::for_member("Task", &comm, Kind::Ipv4).is_err());
    }

    #[test]
    fn test_text_needs_comm_member() {
        let mark = FieldDescriptor::new("sk_mark", "char", "sk", false);

        assert!(RecordField::for_member("Mark", &mark, Kind::Text).is_err());
        let field = RecordField::for_member("Mark", &mark, Kind::Number).unwrap();
        assert_eq!(field.kind, Kind::Number);
    }
}
