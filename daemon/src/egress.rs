//! Remote record forwarding
//!
//! Records are serialized to JSON lines and handed to a background task that
//! keeps a TCP connection to the collector open, reconnecting with capped
//! exponential backoff. A line that failed to write is resent on the next
//! connection, so delivery is at least once.

use crate::{exporter::RecordExporter, types::Record};
use anyhow::{Context, Result};
use bytes::Bytes;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::mpsc::{self, error::TrySendError},
    time::sleep,
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(max: Duration) -> Self {
        Self {
            current: INITIAL_BACKOFF.min(max),
            max,
        }
    }

    /// Delay to wait before the next attempt
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = INITIAL_BACKOFF.min(self.max);
    }
}

/// Background TCP sender fed through a bounded queue
pub struct StreamEgress {
    server: String,
    backoff: Backoff,
    rx: mpsc::Receiver<Bytes>,
}

impl StreamEgress {
    /// Spawn the sender task and return the exporter feeding it
    ///
    /// # Arguments
    ///
    /// * `server` - `host:port` of the collector
    /// * `max_backoff` - Upper bound on the reconnect delay
    /// * `queue` - Number of lines buffered while disconnected
    pub fn spawn(server: String, max_backoff: Duration, queue: usize) -> StreamExporter {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let egress = Self {
            server: server.clone(),
            backoff: Backoff::new(max_backoff),
            rx,
        };

        tokio::spawn(egress.run());

        StreamExporter { server, tx }
    }

    async fn run(mut self) {
        let mut pending: Option<Bytes> = None;

        loop {
            let mut stream = self.connect().await;

            loop {
                let line = match pending.take() {
                    Some(line) => line,
                    None => match self.rx.recv().await {
                        Some(line) => line,
                        None => {
                            debug!("Egress queue for {} closed", self.server);
                            stream.flush().await.ok();
                            return;
                        }
                    },
                };

                if let Err(e) = stream.write_all(&line).await {
                    warn!("Lost connection to {}: {}", self.server, e);
                    pending = Some(line);
                    break;
                }
            }
        }
    }

    async fn connect(&mut self) -> TcpStream {
        loop {
            match TcpStream::connect(&self.server).await {
                Ok(stream) => {
                    info!("Connected to {}", self.server);
                    self.backoff.reset();
                    return stream;
                }
                Err(e) => {
                    let delay = self.backoff.next();
                    warn!(
                        "Failed to connect to {}: {}, retrying in {:?}",
                        self.server, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// [`RecordExporter`] handing JSON lines to a [`StreamEgress`]
pub struct StreamExporter {
    server: String,
    tx: mpsc::Sender<Bytes>,
}

impl RecordExporter for StreamExporter {
    fn export(&mut self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("Failed to serialize record")?;
        line.push(b'\n');

        match self.tx.try_send(Bytes::from(line)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                anyhow::bail!("Egress queue for {} is full, dropping record", self.server)
            }
            Err(TrySendError::Closed(_)) => {
                anyhow::bail!("Egress task for {} has stopped", self.server)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncBufReadExt, BufReader},
        net::TcpListener,
        time::timeout,
    };

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(500));

        assert_eq!(backoff.next(), Duration::from_millis(100));
        assert_eq!(backoff.next(), Duration::from_millis(200));
        assert_eq!(backoff.next(), Duration::from_millis(400));
        assert_eq!(backoff.next(), Duration::from_millis(500));
        assert_eq!(backoff.next(), Duration::from_millis(500));

        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_below_initial() {
        let mut backoff = Backoff::new(Duration::from_millis(50));
        assert_eq!(backoff.next(), Duration::from_millis(50));
        assert_eq!(backoff.next(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_stream_delivers_json_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut exporter = StreamEgress::spawn(addr.to_string(), Duration::from_millis(200), 16);
        let record: Record = serde_json::from_str(r#"{"SRTT":250,"Task":"curl"}"#).unwrap();
        exporter.export(&record).unwrap();

        let (socket, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let mut lines = BufReader::new(socket).lines();
        let line = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let received: Record = serde_json::from_str(&line).unwrap();
        assert_eq!(received, record);
    }

    #[tokio::test]
    async fn test_full_queue_is_an_error() {
        // Nothing listens on port 1, so the queue is never drained past the
        // first line
        let mut exporter = StreamEgress::spawn("127.0.0.1:1".to_string(), Duration::from_secs(10), 1);
        let record = Record::new();

        let results: Vec<bool> = (0..4).map(|_| exporter.export(&record).is_ok()).collect();
        assert!(results.iter().any(|ok| !ok));
    }
}
