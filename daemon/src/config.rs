//! Agent configuration
//!
//! The configuration file (YAML) names the tracepoints to probe, the field
//! sets each probe extracts and where the resulting records go. Resolving it
//! produces one [`ProbePlan`] per tracepoint: the [`ProbeSpec`] handed to the
//! source generator plus the record layout userspace needs to decode what
//! the probe emits.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sockprobe_common::{
    Family, FieldDescriptor, ProbeSpec, TcpState, Tracepoint, DEFAULT_SUFFIX_PREFIX, DS_ICSK,
    DS_TCP_INFO,
};
use sockprobe_kernel::Symbols;
use std::{collections::BTreeMap, fs::read_to_string, path::Path};

use crate::{
    catalog,
    types::{Kind, RecordField},
};

/// Top level configuration
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Probes to generate, one per entry
    pub tracepoints: Vec<TracepointConfig>,
    /// Named field sets referenced by tracepoints
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<FieldConfig>>,
    /// Named record destinations referenced by tracepoints
    #[serde(default)]
    pub egress: BTreeMap<String, EgressConfig>,
    /// Address to location enrichment for line protocol output
    #[serde(default)]
    pub geo: Option<GeoConfig>,
    /// External command turning probe source into an object file
    #[serde(default)]
    pub compiler: CompilerConfig,
}

/// One probe instance
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct TracepointConfig {
    /// `category:name`
    pub name: Tracepoint,
    /// Key into [`Config::fields`]
    pub fields: String,
    /// New-state filter for `sock:inet_sock_set_state`
    #[serde(default)]
    pub tcp_state: TcpState,
    /// Address families to instrument
    #[serde(default = "default_inet")]
    pub inet: Vec<u8>,
    /// Emit 1 in N events per socket, 0 to disable
    #[serde(default)]
    pub sample: u64,
    /// Key into [`Config::egress`]; records are printed as JSON when unset
    #[serde(default)]
    pub egress: Option<String>,
    /// Symbol suffix, defaults to `_<index>`
    #[serde(default)]
    pub suffix: Option<String>,
}

fn default_inet() -> Vec<u8> {
    vec![4, 6]
}

/// One requested field
///
/// `name` selects a catalog field unless `custom` describes the kernel
/// location directly. `filter` is a C predicate on the field's own member,
/// either appended to it (`"> 1000"`) or with `$` standing for the member
/// (`"($ & 0xff) == 0"`). It is expanded separately for each family.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default)]
    pub func: Option<String>,
    #[serde(default)]
    pub math: Option<String>,
    #[serde(default)]
    pub umath: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub custom: Option<CustomField>,
}

/// A field outside the catalog
#[derive(Deserialize, Debug, Clone)]
pub struct CustomField {
    #[serde(flatten)]
    pub descriptor: FieldDescriptor,
    #[serde(default)]
    pub kind: Kind,
}

/// Record destination
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EgressConfig {
    /// JSON lines to a file, or stdout when no path is given
    Json {
        #[serde(default)]
        path: Option<std::path::PathBuf>,
    },
    /// Line protocol points appended to a file
    Influx {
        path: std::path::PathBuf,
        #[serde(default = "default_measurement")]
        measurement: String,
    },
    /// JSON lines forwarded to a remote collector over TCP
    Stream {
        server: String,
        #[serde(default = "default_max_backoff_secs")]
        max_backoff_secs: u64,
        #[serde(default = "default_queue")]
        queue: usize,
    },
}

fn default_measurement() -> String {
    "sockprobe".to_string()
}

fn default_max_backoff_secs() -> u64 {
    10
}

fn default_queue() -> usize {
    1024
}

/// Static address to location table
#[derive(Deserialize, Debug, Clone, Default)]
pub struct GeoConfig {
    /// Record field holding the address to look up
    pub field: String,
    /// Address to tag set
    #[serde(default)]
    pub table: BTreeMap<String, BTreeMap<String, String>>,
}

/// External compiler invocation; `<source> <object>` are appended
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CompilerConfig {
    #[serde(default)]
    pub command: Vec<String>,
}

/// Everything needed to generate, load and decode one probe
#[derive(Debug, Clone)]
pub struct ProbePlan {
    /// Position in [`Config::tracepoints`]
    pub index: usize,
    pub spec: ProbeSpec,
    /// Record layout of each emitted family
    pub records: BTreeMap<Family, Vec<RecordField>>,
    pub egress: Option<String>,
}

impl Config {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Config> {
        let contents = read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Config::from_str(&contents).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Parse a configuration from YAML text
    pub fn from_str(contents: &str) -> Result<Config> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Resolve every tracepoint into a probe plan
    pub fn probe_plans(&self) -> Result<Vec<ProbePlan>> {
        self.tracepoints
            .iter()
            .enumerate()
            .map(|(index, tp)| {
                self.plan(index, tp)
                    .with_context(|| format!("tracepoint #{index} ({})", tp.name))
            })
            .collect()
    }

    fn plan(&self, index: usize, tp: &TracepointConfig) -> Result<ProbePlan> {
        let fields = self
            .fields
            .get(&tp.fields)
            .with_context(|| format!("unknown field set '{}'", tp.fields))?;
        if fields.is_empty() {
            bail!("field set '{}' is empty", tp.fields);
        }

        if let Some(egress) = &tp.egress {
            if !self.egress.contains_key(egress) {
                bail!("unknown egress '{egress}'");
            }
        }

        let suffix = tp
            .suffix
            .clone()
            .unwrap_or_else(|| format!("{DEFAULT_SUFFIX_PREFIX}{index}"));
        let mut spec = ProbeSpec::new(suffix, tp.name.clone());
        spec.tcp_state = tp.tcp_state;
        spec.sample = tp.sample;

        let mut records = BTreeMap::new();
        for marker in &tp.inet {
            let family = Family::from_marker(*marker)?;
            let mut descriptors = Vec::with_capacity(fields.len());
            let mut layout = Vec::with_capacity(fields.len());

            for (index, field) in fields.iter().enumerate() {
                let (descriptor, kind) = resolve(field, family, index)?;
                layout.push(
                    RecordField::for_member(&field.name, &descriptor, kind)
                        .with_context(|| format!("field '{}'", field.name))?,
                );
                descriptors.push(descriptor);
            }

            match family {
                Family::Inet4 => spec.fields4 = descriptors,
                Family::Inet6 => spec.fields6 = descriptors,
            }
            records.insert(family, layout);
        }

        let all = spec.fields4.iter().chain(spec.fields6.iter());
        for field in all {
            spec.tcp_info |= field.ds.starts_with(DS_TCP_INFO);
            spec.icsk |= field.ds.starts_with(DS_ICSK);
        }

        Ok(ProbePlan {
            index,
            spec,
            records,
            egress: tp.egress.clone(),
        })
    }
}

/// Placeholder for the field's own member in a filter
const FILTER_MEMBER: &str = "$";

/// Descriptor and presentation of `field` at `index` for `family`
fn resolve(field: &FieldConfig, family: Family, index: usize) -> Result<(FieldDescriptor, Kind)> {
    let (mut descriptor, kind) = match &field.custom {
        Some(custom) => (custom.descriptor.clone(), custom.kind),
        None => {
            let entry = catalog::lookup(&field.name)
                .with_context(|| format!("unknown field '{}'", field.name))?;
            let source = entry.source(family);
            (source.descriptor(), source.kind)
        }
    };

    if field.func.is_some() {
        descriptor.func = field.func.clone();
    }
    if field.math.is_some() {
        descriptor.math = field.math.clone();
    }
    if field.umath.is_some() {
        descriptor.umath = field.umath.clone();
    }
    if field.filter.is_some() {
        descriptor.filter = field.filter.clone();
    }

    let member = descriptor.member_name(index);
    descriptor.filter = descriptor
        .filter()
        .map(|filter| expand_filter(filter, family, &member));

    Ok((descriptor, kind))
}

/// Turn a configured filter into a guard on `member` of the `family` record
fn expand_filter(filter: &str, family: Family, member: &str) -> String {
    let target = format!("{}.{member}", Symbols::local(family));

    if filter.contains(FILTER_MEMBER) {
        filter.replace(FILTER_MEMBER, &target)
    } else {
        format!("{target} {}", filter.trim())
    }
}
