// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Fixed pool of worker threads draining the work queue

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam::channel::Receiver;
use tracing::{debug, error, info, warn};

use super::queue::{InboundPayload, WorkItem};
use super::stats::PipelineStats;
use crate::detection::{ClassificationResult, DecisionEngine};
use crate::sensors::{BatchMessage, WindowStore};
use crate::streaming::TelemetrySink;

/// Everything a worker needs to turn a payload into a decision
pub struct WorkerContext {
    pub store: Arc<WindowStore>,
    pub engine: DecisionEngine,
    pub sink: TelemetrySink,
    pub stats: Arc<PipelineStats>,
}

impl WorkerContext {
    /// Decode, window, decide and emit one payload.
    ///
    /// Malformed payloads are discarded and produce no decision.
    pub fn process(&self, payload: &InboundPayload) -> Option<ClassificationResult> {
        let batch = match BatchMessage::decode(&payload.bytes, payload.received_at_ms) {
            Ok(batch) => batch,
            Err(e) => {
                self.stats.record_malformed();
                warn!("Discarded payload from {}: {}", payload.routing_key, e);
                return None;
            }
        };

        let window = self.store.append(&batch.device_id, &batch.samples);
        let result = self.engine.decide(&batch.device_id, window.as_ref(), &batch.aux);

        self.stats.record_decision(&result);
        self.sink.emit(&result);
        Some(result)
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start one named thread per receiver
    pub fn spawn(context: Arc<WorkerContext>, receivers: Vec<Receiver<WorkItem>>) -> Result<Self> {
        let mut handles = Vec::with_capacity(receivers.len());

        for (index, rx) in receivers.into_iter().enumerate() {
            let context = Arc::clone(&context);
            let handle = thread::Builder::new()
                .name(format!("fallwatch-worker-{index}"))
                .spawn(move || run(index, &context, rx))
                .with_context(|| format!("spawning worker {index}"))?;
            handles.push(handle);
        }

        info!("Started {} workers", handles.len());
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to see its sentinel
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                error!("A worker thread panicked");
            }
        }
        info!("All workers stopped");
    }
}

fn run(index: usize, context: &WorkerContext, rx: Receiver<WorkItem>) {
    debug!("Worker {} started", index);
    loop {
        match rx.recv() {
            Ok(WorkItem::Batch(payload)) => {
                context.process(&payload);
            }
            Ok(WorkItem::Shutdown) => break,
            // Every sender is gone, nothing more can arrive
            Err(_) => break,
        }
    }
    debug!("Worker {} exiting", index);
}
