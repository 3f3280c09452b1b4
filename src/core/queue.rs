// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Bounded work queue between the dispatcher and the workers

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};

/// Raw ingress message as handed over by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct InboundPayload {
    /// Transport topic the message arrived on
    pub routing_key: String,
    pub bytes: Vec<u8>,
    /// Dispatcher receive time in milliseconds
    pub received_at_ms: i64,
}

/// Unit of work pulled by a worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    Batch(InboundPayload),
    /// Tells exactly one worker to exit its loop
    Shutdown,
}

/// What to do when a lane is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for room, stalling the producer
    Block,
    /// Discard the incoming message
    DropNewest,
    /// Discard the oldest queued message to make room
    DropOldest,
}

/// How messages are assigned to workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    /// One lane drained by every worker
    Shared,
    /// One lane per worker, chosen by hashing the routing key
    TopicAffinity,
}

/// Result of offering a payload to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// Enqueued after evicting the oldest queued message
    EvictedOldest,
    /// Lane was full and the payload was discarded
    Dropped,
    /// Queue no longer has consumers
    Closed,
}

struct Lane {
    tx: Sender<WorkItem>,
    rx: Receiver<WorkItem>,
}

/// One or more bounded lanes with a shared backpressure policy
pub struct WorkQueue {
    lanes: Vec<Lane>,
    policy: BackpressurePolicy,
    routing: Routing,
    workers: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize, policy: BackpressurePolicy, routing: Routing, workers: usize) -> Self {
        let workers = workers.max(1);
        let lane_count = match routing {
            Routing::Shared => 1,
            Routing::TopicAffinity => workers,
        };

        let lanes = (0..lane_count)
            .map(|_| {
                let (tx, rx) = channel::bounded(capacity.max(1));
                Lane { tx, rx }
            })
            .collect();

        Self {
            lanes,
            policy,
            routing,
            workers,
        }
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    pub fn routing(&self) -> Routing {
        self.routing
    }

    /// Receiving end for worker `index`
    pub fn receiver(&self, index: usize) -> Receiver<WorkItem> {
        self.lanes[index % self.lanes.len()].rx.clone()
    }

    /// Messages currently waiting across all lanes
    pub fn len(&self) -> usize {
        self.lanes.iter().map(|l| l.tx.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer a payload according to the backpressure policy
    pub fn push(&self, payload: InboundPayload) -> PushOutcome {
        let lane = &self.lanes[self.lane_index(&payload.routing_key)];
        let item = WorkItem::Batch(payload);

        match self.policy {
            BackpressurePolicy::Block => match lane.tx.send(item) {
                Ok(()) => PushOutcome::Enqueued,
                Err(_) => PushOutcome::Closed,
            },
            BackpressurePolicy::DropNewest => match lane.tx.try_send(item) {
                Ok(()) => PushOutcome::Enqueued,
                Err(TrySendError::Full(_)) => PushOutcome::Dropped,
                Err(TrySendError::Disconnected(_)) => PushOutcome::Closed,
            },
            BackpressurePolicy::DropOldest => Self::push_evicting(lane, item),
        }
    }

    fn push_evicting(lane: &Lane, mut item: WorkItem) -> PushOutcome {
        let mut evicted = false;
        loop {
            match lane.tx.try_send(item) {
                Ok(()) => {
                    return if evicted {
                        PushOutcome::EvictedOldest
                    } else {
                        PushOutcome::Enqueued
                    };
                }
                Err(TrySendError::Disconnected(_)) => return PushOutcome::Closed,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    match lane.rx.try_recv() {
                        // A sentinel is never evicted; the newcomer loses instead
                        Ok(WorkItem::Shutdown) => {
                            let _ = lane.tx.send(WorkItem::Shutdown);
                            return PushOutcome::Dropped;
                        }
                        Ok(WorkItem::Batch(_)) => evicted = true,
                        // A worker emptied the lane between the two calls
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => return PushOutcome::Closed,
                    }
                }
            }
        }
    }

    /// Enqueue one sentinel per worker, waiting for room if needed
    pub fn close(&self) {
        for index in 0..self.workers {
            let lane = &self.lanes[index % self.lanes.len()];
            let _ = lane.tx.send(WorkItem::Shutdown);
        }
    }

    fn lane_index(&self, key: &str) -> usize {
        if self.lanes.len() == 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(key: &str, tag: u8) -> InboundPayload {
        InboundPayload {
            routing_key: key.to_string(),
            bytes: vec![tag],
            received_at_ms: 0,
        }
    }

    fn tag(item: WorkItem) -> Option<u8> {
        match item {
            WorkItem::Batch(p) => Some(p.bytes[0]),
            WorkItem::Shutdown => None,
        }
    }

    #[test]
    fn test_drop_newest_discards_incoming() {
        let queue = WorkQueue::new(2, BackpressurePolicy::DropNewest, Routing::Shared, 1);
        assert_eq!(queue.push(payload("t", 1)), PushOutcome::Enqueued);
        assert_eq!(queue.push(payload("t", 2)), PushOutcome::Enqueued);
        assert_eq!(queue.push(payload("t", 3)), PushOutcome::Dropped);

        let rx = queue.receiver(0);
        assert_eq!(tag(rx.recv().unwrap()), Some(1));
        assert_eq!(tag(rx.recv().unwrap()), Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_oldest_keeps_latest() {
        let queue = WorkQueue::new(2, BackpressurePolicy::DropOldest, Routing::Shared, 1);
        queue.push(payload("t", 1));
        queue.push(payload("t", 2));
        assert_eq!(queue.push(payload("t", 3)), PushOutcome::EvictedOldest);
        assert_eq!(queue.len(), 2);

        let rx = queue.receiver(0);
        assert_eq!(tag(rx.recv().unwrap()), Some(2));
        assert_eq!(tag(rx.recv().unwrap()), Some(3));
    }

    #[test]
    fn test_sentinel_survives_eviction() {
        let queue = WorkQueue::new(1, BackpressurePolicy::DropOldest, Routing::Shared, 1);
        queue.close();
        assert_eq!(queue.push(payload("t", 9)), PushOutcome::Dropped);
        assert_eq!(queue.receiver(0).recv().unwrap(), WorkItem::Shutdown);
    }

    #[test]
    fn test_close_sends_one_sentinel_per_worker() {
        let queue = WorkQueue::new(8, BackpressurePolicy::Block, Routing::Shared, 3);
        queue.close();
        let rx = queue.receiver(0);
        let sentinels = rx.try_iter().filter(|i| *i == WorkItem::Shutdown).count();
        assert_eq!(sentinels, 3);
    }

    #[test]
    fn test_topic_affinity_pins_key_to_lane() {
        let queue = WorkQueue::new(16, BackpressurePolicy::Block, Routing::TopicAffinity, 4);
        for i in 0..6 {
            queue.push(payload("iot/fall_detection/dev-7", i));
        }

        let busy: Vec<usize> = (0..4).filter(|&i| !queue.receiver(i).is_empty()).collect();
        assert_eq!(busy.len(), 1);

        let rx = queue.receiver(busy[0]);
        let order: Vec<_> = rx.try_iter().filter_map(tag).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_policy_names_in_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: BackpressurePolicy,
            routing: Routing,
        }
        let w: Wrapper = toml::from_str("policy = \"drop_oldest\"\nrouting = \"topic_affinity\"").unwrap();
        assert_eq!(w.policy, BackpressurePolicy::DropOldest);
        assert_eq!(w.routing, Routing::TopicAffinity);
    }
}
