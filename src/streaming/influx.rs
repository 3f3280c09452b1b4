// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Time-series egress
//!
//! Workers hand decisions to a [`TelemetrySink`], which never blocks and
//! never fails. A background task batches the points and writes them
//! through a [`PointWriter`]. The backlog between the two is bounded;
//! overflowing points and failed writes are counted and dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SinkConfig;
use crate::core::PipelineStats;
use crate::detection::ClassificationResult;
use crate::error::SinkError;

/// One persisted decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub measurement: String,
    pub device_id: Option<String>,
    pub steps: i64,
    pub bpm: i64,
    pub sound_level: i64,
    pub ml_label: String,
    pub timestamp_ms: i64,
}

impl TelemetryPoint {
    pub fn from_result(result: &ClassificationResult, measurement: &str, tag_device: bool) -> Self {
        Self {
            measurement: measurement.to_string(),
            device_id: tag_device.then(|| result.device_id.clone()),
            steps: result.steps,
            bpm: result.bpm,
            sound_level: result.sound_level,
            ml_label: result.label.as_str().to_string(),
            timestamp_ms: result.timestamp_ms,
        }
    }

    /// Render as one line of InfluxDB line protocol, millisecond precision
    pub fn to_line(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        if let Some(device) = &self.device_id {
            line.push_str(",device_id=");
            line.push_str(&escape(device, &[',', '=', ' ']));
        }
        line.push_str(&format!(
            " steps={}i,bpm={}i,sound_level={}i,ml_label=\"{}\" {}",
            self.steps,
            self.bpm,
            self.sound_level,
            escape(&self.ml_label, &['"']),
            self.timestamp_ms
        ));
        line
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Destination for batches of points
#[async_trait]
pub trait PointWriter: Send + Sync {
    async fn write(&self, points: &[TelemetryPoint]) -> Result<(), SinkError>;
}

/// InfluxDB v2 HTTP write client
pub struct InfluxWriter {
    client: Client,
    base_url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxWriter {
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
        })
    }

    pub fn write_endpoint(&self) -> String {
        format!("{}/api/v2/write", self.base_url)
    }

    pub fn health_endpoint(&self) -> String {
        format!("{}/health", self.base_url)
    }

    /// Check that the store is reachable
    pub async fn ping(&self) -> Result<(), SinkError> {
        let response = self.client.get(self.health_endpoint()).send().await?;
        let status = response.status();
        if status.is_success() {
            info!("InfluxDB at {} is healthy", self.base_url);
            Ok(())
        } else {
            Err(SinkError::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl PointWriter for InfluxWriter {
    async fn write(&self, points: &[TelemetryPoint]) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }

        let body = points
            .iter()
            .map(TelemetryPoint::to_line)
            .collect::<Vec<_>>()
            .join("\n");

        let response = self
            .client
            .post(self.write_endpoint())
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

/// Non-blocking emitter shared by the workers
#[derive(Clone)]
pub struct TelemetrySink {
    tx: mpsc::Sender<TelemetryPoint>,
    measurement: Arc<str>,
    tag_device: bool,
    stats: Arc<PipelineStats>,
}

/// Owner of the background write task
pub struct SinkHandle {
    tx: mpsc::Sender<TelemetryPoint>,
    close_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
    in_flight: Arc<AtomicUsize>,
    stats: Arc<PipelineStats>,
    close_timeout: Duration,
}

impl TelemetrySink {
    /// Start the background writer on `runtime`
    pub fn spawn(
        writer: Arc<dyn PointWriter>,
        config: &SinkConfig,
        stats: Arc<PipelineStats>,
        runtime: &Handle,
    ) -> (Self, SinkHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let task = runtime.spawn(run_writer(
            writer,
            rx,
            close_rx,
            config.max_batch.max(1),
            in_flight.clone(),
            stats.clone(),
        ));

        let sink = Self {
            tx: tx.clone(),
            measurement: Arc::from(config.measurement.as_str()),
            tag_device: config.tag_device,
            stats: stats.clone(),
        };
        let handle = SinkHandle {
            tx,
            close_tx,
            task,
            in_flight,
            stats,
            close_timeout: Duration::from_secs(config.close_timeout_secs),
        };
        (sink, handle)
    }

    /// Queue one decision for writing. Never blocks, never fails.
    ///
    /// When the write backlog is full the point is dropped and counted.
    pub fn emit(&self, result: &ClassificationResult) {
        let point = TelemetryPoint::from_result(result, &self.measurement, self.tag_device);
        match self.tx.try_send(point) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.record_sink_failure(1);
                warn!("Telemetry backlog full, dropped point for {}", result.device_id);
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.record_sink_failure(1);
                debug!("Dropped point for {}: {}", result.device_id, SinkError::Closed);
            }
        }
    }
}

impl SinkHandle {
    /// Write everything queued so far, then stop the background task.
    ///
    /// Whatever is still unwritten when the close timeout expires is
    /// dropped and counted as failed.
    pub async fn close(mut self) {
        let _ = self.close_tx.send(());

        match tokio::time::timeout(self.close_timeout, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Telemetry writer task ended abnormally: {}", e),
            Err(_) => {
                let queued = self.tx.max_capacity() - self.tx.capacity();
                let lost = queued + self.in_flight.load(Ordering::Acquire);
                self.task.abort();
                self.stats.record_sink_failure(lost);
                warn!(
                    "Telemetry flush timed out after {:?}, dropped {} points",
                    self.close_timeout, lost
                );
            }
        }
    }
}

async fn run_writer(
    writer: Arc<dyn PointWriter>,
    mut rx: mpsc::Receiver<TelemetryPoint>,
    mut close_rx: oneshot::Receiver<()>,
    max_batch: usize,
    in_flight: Arc<AtomicUsize>,
    stats: Arc<PipelineStats>,
) {
    let mut batch = Vec::with_capacity(max_batch);

    loop {
        tokio::select! {
            biased;
            point = rx.recv() => match point {
                Some(point) => batch.push(point),
                None => break,
            },
            _ = &mut close_rx => break,
        }

        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(point) => batch.push(point),
                Err(_) => break,
            }
        }

        flush(writer.as_ref(), &mut batch, &in_flight, &stats).await;
    }

    // Drain what was queued before the close request
    while let Ok(point) = rx.try_recv() {
        batch.push(point);
        if batch.len() == max_batch {
            flush(writer.as_ref(), &mut batch, &in_flight, &stats).await;
        }
    }
    flush(writer.as_ref(), &mut batch, &in_flight, &stats).await;
    debug!("Telemetry writer stopped");
}

async fn flush(
    writer: &dyn PointWriter,
    batch: &mut Vec<TelemetryPoint>,
    in_flight: &AtomicUsize,
    stats: &PipelineStats,
) {
    if batch.is_empty() {
        return;
    }
    in_flight.store(batch.len(), Ordering::Release);
    match writer.write(batch).await {
        Ok(()) => {
            stats.record_written(batch.len());
            debug!("Wrote {} points", batch.len());
        }
        Err(e) => {
            stats.record_sink_failure(batch.len());
            warn!("Discarded {} points: {}", batch.len(), e);
        }
    }
    in_flight.store(0, Ordering::Release);
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DecisionSource, Label};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemoryWriter {
        batches: Mutex<Vec<Vec<TelemetryPoint>>>,
    }

    #[async_trait]
    impl PointWriter for MemoryWriter {
        async fn write(&self, points: &[TelemetryPoint]) -> Result<(), SinkError> {
            self.batches.lock().push(points.to_vec());
            Ok(())
        }
    }

    struct RejectingWriter;

    #[async_trait]
    impl PointWriter for RejectingWriter {
        async fn write(&self, _points: &[TelemetryPoint]) -> Result<(), SinkError> {
            Err(SinkError::Rejected {
                status: 401,
                message: "unauthorized".into(),
            })
        }
    }

    /// Accepts a batch and never finishes writing it
    struct StalledWriter;

    #[async_trait]
    impl PointWriter for StalledWriter {
        async fn write(&self, _points: &[TelemetryPoint]) -> Result<(), SinkError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn result(device: &str, label: Label) -> ClassificationResult {
        ClassificationResult {
            device_id: device.into(),
            label,
            source: DecisionSource::Classifier,
            audio_override: false,
            steps: 120,
            bpm: 72,
            sound_level: 33,
            timestamp_ms: 1_700_000_000_123,
        }
    }

    #[test]
    fn test_line_protocol() {
        let point = TelemetryPoint::from_result(&result("wrist 1", Label::Walking), "patient_activity", false);
        assert_eq!(
            point.to_line(),
            "patient_activity steps=120i,bpm=72i,sound_level=33i,ml_label=\"walking\" 1700000000123"
        );

        let tagged = TelemetryPoint::from_result(&result("wrist 1,a=b", Label::Fall), "patient_activity", true);
        assert_eq!(
            tagged.to_line(),
            "patient_activity,device_id=wrist\\ 1\\,a\\=b steps=120i,bpm=72i,sound_level=33i,ml_label=\"fall\" 1700000000123"
        );
    }

    #[test]
    fn test_endpoints() {
        let config = SinkConfig {
            url: "https://influx.example.org:8086/".into(),
            ..SinkConfig::default()
        };
        let writer = InfluxWriter::new(&config).unwrap();
        assert_eq!(writer.write_endpoint(), "https://influx.example.org:8086/api/v2/write");
        assert_eq!(writer.health_endpoint(), "https://influx.example.org:8086/health");
    }

    #[tokio::test]
    async fn test_close_flushes_everything_in_batches() {
        let writer = Arc::new(MemoryWriter::default());
        let stats = Arc::new(PipelineStats::new());
        let config = SinkConfig {
            max_batch: 2,
            ..SinkConfig::default()
        };

        let (sink, handle) = TelemetrySink::spawn(writer.clone(), &config, stats.clone(), &Handle::current());
        for i in 0..5 {
            sink.emit(&result(&format!("dev-{i}"), Label::Inactivity));
        }
        handle.close().await;

        let batches = writer.batches.lock();
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 5);
        assert!(batches.iter().all(|b| b.len() <= 2));
        assert_eq!(stats.snapshot().points_written, 5);
    }

    #[tokio::test]
    async fn test_write_failures_are_contained() {
        let stats = Arc::new(PipelineStats::new());
        let (sink, handle) = TelemetrySink::spawn(
            Arc::new(RejectingWriter),
            &SinkConfig::default(),
            stats.clone(),
            &Handle::current(),
        );

        sink.emit(&result("dev", Label::Fall));
        sink.emit(&result("dev", Label::Walking));
        handle.close().await;

        // Emitting after close is still silent
        sink.emit(&result("dev", Label::Walking));

        let snap = stats.snapshot();
        assert_eq!(snap.points_written, 0);
        assert_eq!(snap.sink_failures, 3);
    }

    #[tokio::test]
    async fn test_backlog_is_bounded_when_store_stalls() {
        let stats = Arc::new(PipelineStats::new());
        let config = SinkConfig {
            max_batch: 2,
            queue_capacity: 4,
            close_timeout_secs: 1,
            ..SinkConfig::default()
        };
        let (sink, handle) =
            TelemetrySink::spawn(Arc::new(StalledWriter), &config, stats.clone(), &Handle::current());

        // The writer task has not run yet, so only the backlog capacity fits
        for i in 0..20 {
            sink.emit(&result(&format!("dev-{i}"), Label::Walking));
        }
        assert_eq!(stats.snapshot().sink_failures, 16);

        // Close gives up at the deadline and counts what never got written
        handle.close().await;
        let snap = stats.snapshot();
        assert_eq!(snap.points_written, 0);
        assert_eq!(snap.sink_failures, 20);
    }
}
