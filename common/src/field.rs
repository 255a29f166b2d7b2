//! Field descriptors
//!
//! A [`FieldDescriptor`] describes one value the probe extracts: where it is
//! read from, how it is transformed and which struct member receives it.
//! The descriptor is plain data; it does no validation of its own.

use crate::{constants::*, types::DsKind};
use serde::{Deserialize, Serialize};

/// One requested value
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FieldDescriptor {
    /// Destination member base name
    pub c_field: String,
    /// C type used for the member declaration
    pub c_type: String,
    /// Data source: a binding in scope or a helper identifier
    pub ds: String,
    /// Access `ds` by value (`.`) rather than through a pointer (`->`)
    #[serde(default)]
    pub dsnp: bool,
    /// Wrapper function applied to the read expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    /// Raw text appended to the read expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math: Option<String>,
    /// Raw text appended after the parenthesized term
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub umath: Option<String>,
    /// C predicate; a true value discards the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl FieldDescriptor {
    pub fn new(
        c_field: impl Into<String>,
        c_type: impl Into<String>,
        ds: impl Into<String>,
        dsnp: bool,
    ) -> Self {
        Self {
            c_field: c_field.into(),
            c_type: c_type.into(),
            ds: ds.into(),
            dsnp,
            ..Default::default()
        }
    }

    pub fn with_func(mut self, func: impl Into<String>) -> Self {
        self.func = Some(func.into());
        self
    }

    pub fn with_math(mut self, math: impl Into<String>) -> Self {
        self.math = Some(math.into());
        self
    }

    pub fn with_umath(mut self, umath: impl Into<String>) -> Self {
        self.umath = Some(umath.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// How the data source is routed by the generator
    pub fn ds_kind(&self) -> DsKind {
        DsKind::classify(&self.ds)
    }

    /// The reserved task command member
    pub fn is_current_comm(&self) -> bool {
        self.c_field == FIELD_CURRENT_COMM
    }

    /// One of the two IPv6 address members that need a safe copy
    pub fn is_ipv6_address(&self) -> bool {
        self.c_field == FIELD_V6_DADDR || self.c_field == FIELD_V6_RCV_SADDR
    }

    /// Filter text, treating an empty string as absent
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref().filter(|f| !f.is_empty())
    }

    /// Name of the generated struct member at position `index`
    ///
    /// Every member carries its position so the same logical field can be
    /// requested more than once with different transforms. The task command
    /// array is the exception and is never suffixed.
    pub fn member_name(&self, index: usize) -> String {
        if self.is_current_comm() {
            self.c_field.clone()
        } else {
            format!("{}{}", self.c_field, index)
        }
    }
}
