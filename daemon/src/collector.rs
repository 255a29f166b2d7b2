//! Record routing and bookkeeping
//!
//! Sends each decoded record to the egress its probe was configured with and
//! keeps per-probe counts for progress reports and the final summary.

use crate::{
    config::{Config, EgressConfig},
    egress::StreamEgress,
    exporter::{InfluxExporter, JsonExporter, RecordExporter, StaticGeo},
    types::Event,
};
use anyhow::{Context, Result};
use log::{info, warn};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Mutex},
    time::interval,
};

/// Name of the egress used by probes without one
pub const DEFAULT_EGRESS: &str = "stdout";

/// Counters kept while collecting
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectorStats {
    /// Records received per probe index
    pub records: BTreeMap<usize, u64>,
    /// Records an exporter failed to take
    pub export_errors: u64,
}

impl CollectorStats {
    pub fn total_records(&self) -> u64 {
        self.records.values().sum()
    }
}

/// Routes records from every probe to its exporter
pub struct RecordCollector {
    exporters: BTreeMap<String, Box<dyn RecordExporter>>,
    routes: BTreeMap<usize, String>,
    stats: CollectorStats,
}

impl RecordCollector {
    /// Create a collector with the given named exporters
    ///
    /// A JSON stdout exporter is added under [`DEFAULT_EGRESS`] unless one
    /// with that name was supplied.
    pub fn new(mut exporters: BTreeMap<String, Box<dyn RecordExporter>>) -> Result<Self> {
        if !exporters.contains_key(DEFAULT_EGRESS) {
            exporters.insert(
                DEFAULT_EGRESS.to_string(),
                Box::new(JsonExporter::new(None, false)?),
            );
        }

        Ok(Self {
            exporters,
            routes: BTreeMap::new(),
            stats: CollectorStats::default(),
        })
    }

    /// Build the exporters named in `config`, then the collector
    ///
    /// Stream egresses spawn their sender task, so this must run inside the
    /// tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut exporters: BTreeMap<String, Box<dyn RecordExporter>> = BTreeMap::new();

        for (name, egress) in &config.egress {
            let exporter: Box<dyn RecordExporter> = match egress {
                EgressConfig::Json { path } => Box::new(
                    JsonExporter::new(path.clone(), false)
                        .with_context(|| format!("egress '{name}'"))?,
                ),
                EgressConfig::Influx { path, measurement } => {
                    let exporter = InfluxExporter::new(path.clone(), measurement.clone())
                        .with_context(|| format!("egress '{name}'"))?;
                    match &config.geo {
                        Some(geo) => Box::new(
                            exporter.with_geo(geo.field.clone(), Box::new(StaticGeo::new(geo))),
                        ),
                        None => Box::new(exporter),
                    }
                }
                EgressConfig::Stream {
                    server,
                    max_backoff_secs,
                    queue,
                } => Box::new(StreamEgress::spawn(
                    server.clone(),
                    Duration::from_secs(*max_backoff_secs),
                    *queue,
                )),
            };
            info!("   Egress {}: {:?}", name, egress);
            exporters.insert(name.clone(), exporter);
        }

        Self::new(exporters)
    }

    /// Send records of `probe` to the exporter named `egress`
    pub fn route(&mut self, probe: usize, egress: Option<&str>) -> Result<()> {
        let egress = egress.unwrap_or(DEFAULT_EGRESS);
        if !self.exporters.contains_key(egress) {
            anyhow::bail!("unknown egress '{egress}' for probe #{probe}");
        }
        self.routes.insert(probe, egress.to_string());
        Ok(())
    }

    /// Export one event
    pub fn add_event(&mut self, event: &Event) {
        *self.stats.records.entry(event.probe).or_default() += 1;

        let egress = self
            .routes
            .get(&event.probe)
            .map(String::as_str)
            .unwrap_or(DEFAULT_EGRESS);

        let Some(exporter) = self.exporters.get_mut(egress) else {
            self.stats.export_errors += 1;
            return;
        };

        if let Err(e) = exporter.export(&event.record) {
            self.stats.export_errors += 1;
            warn!("Failed to export record of probe #{}: {:#}", event.probe, e);
        }
    }

    /// Flush every exporter
    pub fn flush(&mut self) -> Result<()> {
        for (name, exporter) in self.exporters.iter_mut() {
            exporter
                .flush()
                .with_context(|| format!("Failed to flush egress '{name}'"))?;
        }
        Ok(())
    }

    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }
}

/// Feed events from `rx` into the collector until every sender is gone
pub async fn run(collector: Arc<Mutex<RecordCollector>>, mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        collector.lock().await.add_event(&event);
    }
}

/// Spawn progress reporter
///
/// Creates a task that periodically reports collection progress.
///
/// # Arguments
///
/// * `collector` - Shared collector to report on
/// * `interval_secs` - Reporting interval in seconds
pub fn spawn_progress_reporter(collector: Arc<Mutex<RecordCollector>>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let collector = collector.lock().await;
            let stats = collector.stats();
            info!(
                "Progress: {} records from {} probes, {} export errors",
                stats.total_records(),
                stats.records.len(),
                stats.export_errors
            );
        }
    });
}
