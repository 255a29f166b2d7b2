//! Record exporters
//!
//! Provides the local record sinks (JSON lines, InfluxDB line protocol).
//! Remote forwarding lives in [`crate::egress`].

use crate::{
    config::GeoConfig,
    types::{Record, TIMESTAMP_FIELD},
};
use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

/// Trait for record exporters
pub trait RecordExporter: Send {
    /// Export one record
    fn export(&mut self, record: &Record) -> Result<()>;

    /// Flush anything buffered
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// JSON lines exporter
pub struct JsonExporter {
    writer: Box<dyn Write + Send>,
    pretty: bool,
}

impl JsonExporter {
    /// Create a JSON exporter appending to `output_path`, or stdout
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file, `None` for stdout
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: Option<PathBuf>, pretty: bool) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match output_path {
            Some(path) => Box::new(io::BufWriter::new(open_append(&path)?)),
            None => Box::new(io::stdout()),
        };
        Ok(Self::with_writer(writer, pretty))
    }

    pub fn with_writer(writer: Box<dyn Write + Send>, pretty: bool) -> Self {
        Self { writer, pretty }
    }
}

impl RecordExporter for JsonExporter {
    fn export(&mut self, record: &Record) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(record)?
        } else {
            serde_json::to_string(record)?
        };

        writeln!(self.writer, "{json}").context("Failed to write JSON record")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush JSON output")
    }
}

/// Address to location lookup used to enrich points
pub trait Geo: Send {
    /// Tags describing `addr`; empty when unknown
    fn lookup(&self, addr: &str) -> BTreeMap<String, String>;
}

/// [`Geo`] backed by a static table from the configuration
pub struct StaticGeo {
    table: BTreeMap<String, BTreeMap<String, String>>,
}

impl StaticGeo {
    pub fn new(config: &GeoConfig) -> Self {
        Self {
            table: config.table.clone(),
        }
    }
}

impl Geo for StaticGeo {
    fn lookup(&self, addr: &str) -> BTreeMap<String, String> {
        self.table.get(addr).cloned().unwrap_or_default()
    }
}

/// InfluxDB line protocol exporter
///
/// String values become tags, numbers become fields and `Timestamp` sets
/// the point time. When geo enrichment is configured the address in the
/// geo field is replaced by the tags the lookup returns.
pub struct InfluxExporter {
    writer: Box<dyn Write + Send>,
    measurement: String,
    geo: Option<(String, Box<dyn Geo>)>,
}

impl InfluxExporter {
    /// Create a new InfluxDB exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `measurement` - Measurement name for InfluxDB
    pub fn new(output_path: PathBuf, measurement: String) -> Result<Self> {
        let writer = Box::new(io::BufWriter::new(open_append(&output_path)?));
        Ok(Self::with_writer(writer, measurement))
    }

    pub fn with_writer(writer: Box<dyn Write + Send>, measurement: String) -> Self {
        Self {
            writer,
            measurement,
            geo: None,
        }
    }

    /// Enrich the address found in `field` through `geo`
    pub fn with_geo(mut self, field: String, geo: Box<dyn Geo>) -> Self {
        self.geo = Some((field, geo));
        self
    }

    /// Convert one record to a line protocol point
    ///
    /// Returns `None` for records without any numeric field, which line
    /// protocol cannot represent.
    fn to_influx_line(&self, record: &Record) -> Option<String> {
        let mut tags = BTreeMap::new();
        let mut fields = BTreeMap::new();
        let mut timestamp = None;

        for (key, value) in record {
            match value {
                Value::String(s) => match &self.geo {
                    Some((geo_field, geo)) if geo_field == key => tags.extend(geo.lookup(s)),
                    _ => {
                        tags.insert(key.clone(), s.clone());
                    }
                },
                Value::Number(n) if key == TIMESTAMP_FIELD => timestamp = n.as_i64(),
                Value::Number(n) if n.is_f64() => {
                    fields.insert(key.clone(), n.to_string());
                }
                Value::Number(n) => {
                    fields.insert(key.clone(), format!("{n}i"));
                }
                _ => {}
            }
        }

        if fields.is_empty() {
            return None;
        }

        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &tags {
            line.push_str(&format!(
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            ));
        }

        let fields: Vec<String> = fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), value))
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));

        if let Some(ts) = timestamp {
            line.push_str(&format!(" {}", ts * 1_000_000_000));
        }

        Some(line)
    }
}

impl RecordExporter for InfluxExporter {
    fn export(&mut self, record: &Record) -> Result<()> {
        match self.to_influx_line(record) {
            Some(line) => {
                writeln!(self.writer, "{line}").context("Failed to write line protocol point")?
            }
            None => debug!("Skipping record without numeric fields"),
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush line protocol output")
    }
}

fn open_append(path: &PathBuf) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to create output file: {:?}", path))
}

/// Backslash-escape `special` characters
fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
