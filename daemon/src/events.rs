//! Event processing from probe perf channels
//!
//! Reads raw records from per-CPU perf buffers, decodes them with the
//! record layout of their family and forwards them to the collector.

use crate::{
    layout::RecordLayout,
    types::{Event, Record, HOSTNAME_FIELD, TIMESTAMP_FIELD},
};
use anyhow::Result;
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData},
    util::online_cpus,
};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use sockprobe_common::Family;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Number of records read from a perf buffer per wakeup
const READ_BATCH: usize = 10;

/// Spawns perf buffer readers and stamps decoded records
pub struct EventReader {
    tx: mpsc::Sender<Event>,
    hostname: String,
    verbose: bool,
}

impl EventReader {
    /// Create a new event reader
    ///
    /// # Arguments
    ///
    /// * `tx` - Channel decoded events are sent on
    /// * `hostname` - Value of the `Hostname` field added to every record
    /// * `verbose` - Log every decoded record
    pub fn new(tx: mpsc::Sender<Event>, hostname: String, verbose: bool) -> Self {
        Self {
            tx,
            hostname,
            verbose,
        }
    }

    /// Spawn one reader task per online CPU for a probe channel
    ///
    /// # Arguments
    ///
    /// * `probe` - Index of the probe the channel belongs to
    /// * `family` - Address family of the channel
    /// * `layout` - Layout of the records on the channel
    /// * `perf_array` - The channel's perf event array
    pub fn spawn_cpu_readers(
        &self,
        probe: usize,
        family: Family,
        layout: RecordLayout,
        mut perf_array: AsyncPerfEventArray<MapData>,
    ) -> Result<()> {
        let cpus = online_cpus()?;
        info!(
            "Spawning {} readers for probe #{} on {} CPUs",
            family,
            probe,
            cpus.len()
        );

        let layout = Arc::new(layout);

        for cpu_id in cpus {
            let mut buf = perf_array.open(cpu_id, None)?;
            let layout = Arc::clone(&layout);
            let tx = self.tx.clone();
            let hostname = self.hostname.clone();
            let verbose = self.verbose;

            tokio::spawn(async move {
                let mut buffers = (0..READ_BATCH)
                    .map(|_| BytesMut::with_capacity(layout.size()))
                    .collect::<Vec<_>>();

                loop {
                    let events = match buf.read_events(&mut buffers).await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!("Error reading {} events from CPU {}: {}", family, cpu_id, e);
                            continue;
                        }
                    };

                    if events.lost > 0 {
                        warn!("Lost {} {} events on CPU {}", events.lost, family, cpu_id);
                    }

                    for raw in buffers.iter_mut().take(events.read) {
                        let mut record = match layout.decode(raw) {
                            Ok(record) => record,
                            Err(e) => {
                                warn!("Dropping undecodable {} record: {}", family, e);
                                continue;
                            }
                        };
                        stamp(&mut record, &hostname, Utc::now());

                        if verbose {
                            debug!("probe #{} {}: {}", probe, family, Value::Object(record.clone()));
                        }

                        if tx.send(Event { probe, record }).await.is_err() {
                            debug!("Collector gone, stopping {} reader on CPU {}", family, cpu_id);
                            return;
                        }
                    }
                }
            });
        }

        Ok(())
    }
}

/// Add the `Timestamp` (unix seconds) and `Hostname` fields
pub fn stamp(record: &mut Record, hostname: &str, now: DateTime<Utc>) {
    record.insert(TIMESTAMP_FIELD.to_string(), Value::from(now.timestamp()));
    record.insert(HOSTNAME_FIELD.to_string(), Value::from(hostname));
}

/// Hostname of this machine, `unknown` when it cannot be determined
pub fn local_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|h| h.trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}
