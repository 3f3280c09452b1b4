// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Pipeline lifecycle: wiring at startup, ordered teardown at shutdown

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::info;

use super::dispatcher::Dispatcher;
use super::queue::WorkQueue;
use super::stats::{PipelineStats, StatsSnapshot};
use super::worker::{WorkerContext, WorkerPool};
use crate::config::Config;
use crate::detection::{DecisionEngine, WindowClassifier};
use crate::sensors::WindowStore;
use crate::streaming::{PointWriter, SinkHandle, TelemetrySink};

/// Running classification pipeline
pub struct Engine {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<WorkQueue>,
    workers: WorkerPool,
    sink: SinkHandle,
    store: Arc<WindowStore>,
    stats: Arc<PipelineStats>,
    reporter: Option<JoinHandle<()>>,
    runtime: Handle,
    start_time: Instant,
}

impl Engine {
    /// Build the queue, workers and sink and start them.
    ///
    /// Async parts run on `runtime`; workers are plain threads.
    pub fn start(
        config: &Config,
        classifier: Arc<dyn WindowClassifier>,
        writer: Arc<dyn PointWriter>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = &config.pipeline;
        info!("Starting fallwatch pipeline...");

        let stats = Arc::new(PipelineStats::new());
        let queue = Arc::new(WorkQueue::new(
            pipeline.queue_capacity,
            pipeline.backpressure,
            pipeline.routing,
            pipeline.worker_count,
        ));
        let store = Arc::new(WindowStore::with_shards(
            pipeline.window_size,
            pipeline.window_shards,
        ));
        let (sink, sink_handle) = TelemetrySink::spawn(writer, &config.sink, stats.clone(), &runtime);

        let context = Arc::new(WorkerContext {
            store: store.clone(),
            engine: DecisionEngine::new(&config.rules, classifier),
            sink,
            stats: stats.clone(),
        });
        let receivers = (0..pipeline.worker_count).map(|i| queue.receiver(i)).collect();
        let workers = WorkerPool::spawn(context, receivers)?;

        let reporter = (pipeline.stats_interval_secs > 0).then(|| {
            let stats = stats.clone();
            let period = Duration::from_secs(pipeline.stats_interval_secs);
            runtime.spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    info!("Pipeline stats: {}", stats.snapshot());
                }
            })
        });

        info!(
            "Pipeline started: window={} workers={} queue={} ({:?}, {:?})",
            pipeline.window_size,
            workers.len(),
            pipeline.queue_capacity,
            pipeline.backpressure,
            pipeline.routing
        );

        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(queue.clone(), stats.clone())),
            queue,
            workers,
            sink: sink_handle,
            store,
            stats,
            reporter,
            runtime,
            start_time: Instant::now(),
        })
    }

    /// Entry point for the transport
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn device_count(&self) -> usize {
        self.store.device_count()
    }

    pub fn uptime(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Stop accepting, let workers finish the queue, then flush the sink.
    ///
    /// Blocks the calling thread; call it from outside the runtime.
    pub fn shutdown(self) -> StatsSnapshot {
        info!("Stopping fallwatch pipeline...");
        self.dispatcher.stop_accepting();

        self.queue.close();
        self.workers.join();

        if let Some(reporter) = self.reporter {
            reporter.abort();
        }
        self.runtime.block_on(self.sink.close());

        let summary = self.stats.snapshot();
        info!(
            "Pipeline stopped after {}s, {} devices seen",
            self.start_time.elapsed().as_secs(),
            self.store.device_count()
        );
        summary
    }
}
