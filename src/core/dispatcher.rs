// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Transport-facing entry point of the pipeline
//!
//! Runs on the transport's delivery thread, so it only stamps the receive
//! time, copies the bytes and offers them to the queue. Decoding happens
//! on the workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{trace, warn};

use super::queue::{BackpressurePolicy, InboundPayload, PushOutcome, WorkQueue};
use super::stats::PipelineStats;

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Enqueued,
    /// Enqueued, but an older message was discarded
    EvictedOldest,
    /// Discarded because the queue was full
    Dropped,
    /// Pipeline is shutting down
    Rejected,
}

pub struct Dispatcher {
    queue: Arc<WorkQueue>,
    stats: Arc<PipelineStats>,
    accepting: AtomicBool,
}

impl Dispatcher {
    pub fn new(queue: Arc<WorkQueue>, stats: Arc<PipelineStats>) -> Self {
        Self {
            queue,
            stats,
            accepting: AtomicBool::new(true),
        }
    }

    /// Whether `dispatch` may wait for queue room
    pub fn may_block(&self) -> bool {
        self.queue.policy() == BackpressurePolicy::Block
    }

    pub fn dispatch(&self, routing_key: &str, payload: &[u8]) -> DispatchOutcome {
        self.dispatch_at(routing_key, payload, Utc::now().timestamp_millis())
    }

    pub fn dispatch_at(&self, routing_key: &str, payload: &[u8], received_at_ms: i64) -> DispatchOutcome {
        if !self.accepting.load(Ordering::Acquire) {
            return DispatchOutcome::Rejected;
        }
        self.stats.record_received();

        let outcome = self.queue.push(InboundPayload {
            routing_key: routing_key.to_string(),
            bytes: payload.to_vec(),
            received_at_ms,
        });

        match outcome {
            PushOutcome::Enqueued => {
                self.stats.record_enqueued();
                trace!("Queued {} bytes from {}", payload.len(), routing_key);
                DispatchOutcome::Enqueued
            }
            PushOutcome::EvictedOldest => {
                self.stats.record_enqueued();
                self.stats.record_evicted();
                warn!("Work queue full, evicted oldest message");
                DispatchOutcome::EvictedOldest
            }
            PushOutcome::Dropped => {
                self.stats.record_dropped();
                warn!("Work queue full, dropped message from {}", routing_key);
                DispatchOutcome::Dropped
            }
            PushOutcome::Closed => DispatchOutcome::Rejected,
        }
    }

    /// Refuse all further messages
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::queue::{Routing, WorkItem};

    #[test]
    fn test_payload_is_forwarded_untouched() {
        let queue = Arc::new(WorkQueue::new(4, BackpressurePolicy::DropNewest, Routing::Shared, 1));
        let stats = Arc::new(PipelineStats::new());
        let dispatcher = Dispatcher::new(queue.clone(), stats.clone());

        let outcome = dispatcher.dispatch_at("iot/fall_detection", b"not even json", 42);
        assert_eq!(outcome, DispatchOutcome::Enqueued);

        match queue.receiver(0).recv().unwrap() {
            WorkItem::Batch(p) => {
                assert_eq!(p.bytes, b"not even json");
                assert_eq!(p.received_at_ms, 42);
                assert_eq!(p.routing_key, "iot/fall_detection");
            }
            WorkItem::Shutdown => panic!("unexpected sentinel"),
        }
        assert_eq!(stats.snapshot().enqueued, 1);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let queue = Arc::new(WorkQueue::new(1, BackpressurePolicy::DropNewest, Routing::Shared, 1));
        let stats = Arc::new(PipelineStats::new());
        let dispatcher = Dispatcher::new(queue, stats.clone());

        dispatcher.dispatch("t", b"{}");
        assert_eq!(dispatcher.dispatch("t", b"{}"), DispatchOutcome::Dropped);
        assert_eq!(stats.snapshot().dropped, 1);
        assert!(!dispatcher.may_block());
    }

    #[test]
    fn test_rejects_after_stop() {
        let queue = Arc::new(WorkQueue::new(4, BackpressurePolicy::Block, Routing::Shared, 1));
        let stats = Arc::new(PipelineStats::new());
        let dispatcher = Dispatcher::new(queue.clone(), stats.clone());

        dispatcher.stop_accepting();
        assert_eq!(dispatcher.dispatch("t", b"{}"), DispatchOutcome::Rejected);
        assert!(queue.is_empty());
        assert_eq!(stats.snapshot().received, 0);
    }
}
