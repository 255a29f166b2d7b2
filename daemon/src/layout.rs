//! Record struct layout
//!
//! Rebuilds the C layout of a generated record struct (natural alignment,
//! members in declaration order) so raw perf samples can be decoded into
//! [`Record`]s without generated Rust bindings.

use anyhow::{bail, Result};
use serde_json::Value;
use sockprobe_common::TASK_COMM_LEN;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::types::{Kind, Record, RecordField};

/// Decoded shape of one member
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scalar {
    Unsigned(usize),
    Signed(usize),
    Ipv4,
    Ipv6,
    Text(usize),
}

impl Scalar {
    fn size(self) -> usize {
        match self {
            Scalar::Unsigned(n) | Scalar::Signed(n) | Scalar::Text(n) => n,
            Scalar::Ipv4 => 4,
            Scalar::Ipv6 => 16,
        }
    }
}

#[derive(Clone, Debug)]
struct Slot {
    name: String,
    offset: usize,
    scalar: Scalar,
}

/// Byte layout of one generated record struct
#[derive(Clone, Debug)]
pub struct RecordLayout {
    slots: Vec<Slot>,
    size: usize,
}

/// Size, alignment and signedness of a C scalar type
fn c_type_info(c_type: &str) -> Option<(usize, bool)> {
    let info = match c_type.trim() {
        "u8" | "__u8" | "unsigned char" | "bool" => (1, false),
        "s8" | "__s8" | "char" | "signed char" => (1, true),
        "u16" | "__u16" | "__be16" | "unsigned short" => (2, false),
        "s16" | "__s16" | "short" => (2, true),
        "u32" | "__u32" | "__be32" | "unsigned int" | "unsigned" => (4, false),
        "s32" | "__s32" | "int" => (4, true),
        "u64" | "__u64" | "__be64" | "unsigned long" | "unsigned long long" => (8, false),
        "s64" | "__s64" | "long" | "long long" => (8, true),
        "unsigned __int128" | "__u128" => (16, false),
        "__int128" | "__s128" => (16, true),
        _ => return None,
    };
    Some(info)
}

impl RecordLayout {
    /// Compute the layout of a struct declared with `fields` in order
    pub fn new(fields: &[RecordField]) -> Result<Self> {
        let mut slots = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut max_align = 1;

        for field in fields {
            let Some((size, signed)) = c_type_info(&field.c_type) else {
                bail!("unsupported C type '{}' for field '{}'", field.c_type, field.name);
            };

            let (scalar, align) = match field.kind {
                Kind::Text => (Scalar::Text(size * TASK_COMM_LEN), size),
                Kind::Ipv4 if size == 4 => (Scalar::Ipv4, size),
                Kind::Ipv6 if size == 16 => (Scalar::Ipv6, size),
                Kind::Ipv4 | Kind::Ipv6 => bail!(
                    "field '{}' of type '{}' cannot hold a {:?} address",
                    field.name,
                    field.c_type,
                    field.kind
                ),
                Kind::Number if signed => (Scalar::Signed(size), size),
                Kind::Number => (Scalar::Unsigned(size), size),
            };

            offset = align_up(offset, align);
            slots.push(Slot {
                name: field.name.clone(),
                offset,
                scalar,
            });
            offset += scalar.size();
            max_align = max_align.max(align);
        }

        Ok(Self {
            slots,
            size: align_up(offset, max_align),
        })
    }

    /// `sizeof` the struct
    pub fn size(&self) -> usize {
        self.size
    }

    /// Offset of the member published as `name`
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.slots.iter().find(|s| s.name == name).map(|s| s.offset)
    }

    /// Decode one raw record
    pub fn decode(&self, data: &[u8]) -> Result<Record> {
        if data.len() < self.size {
            bail!(
                "short record: got {} bytes, expected {}",
                data.len(),
                self.size
            );
        }

        let mut record = Record::new();
        for slot in &self.slots {
            let raw = &data[slot.offset..slot.offset + slot.scalar.size()];
            record.insert(slot.name.clone(), decode_scalar(slot.scalar, raw));
        }

        Ok(record)
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

fn decode_scalar(scalar: Scalar, raw: &[u8]) -> Value {
    match scalar {
        Scalar::Unsigned(_) => Value::from(read_unsigned(raw)),
        Scalar::Signed(_) => Value::from(read_signed(raw)),
        Scalar::Ipv4 => {
            let octets: [u8; 4] = [raw[0], raw[1], raw[2], raw[3]];
            Value::from(Ipv4Addr::from(octets).to_string())
        }
        Scalar::Ipv6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(raw);
            Value::from(Ipv6Addr::from(octets).to_string())
        }
        Scalar::Text(_) => {
            let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
            Value::from(String::from_utf8_lossy(&raw[..end]).into_owned())
        }
    }
}

/// Native-endian unsigned read; 128-bit values keep their low 64 bits
fn read_unsigned(raw: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = raw.len().min(8);
    if cfg!(target_endian = "little") {
        buf[..n].copy_from_slice(&raw[..n]);
    } else {
        buf[8 - n..].copy_from_slice(&raw[raw.len() - n..]);
    }
    u64::from_ne_bytes(buf)
}

fn read_signed(raw: &[u8]) -> i64 {
    let n = raw.len().min(8);
    let value = read_unsigned(raw);
    let shift = 64 - n * 8;
    ((value << shift) as i64) >> shift
}
