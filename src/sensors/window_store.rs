// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Per-device rolling sample windows
//!
//! Devices are spread over a fixed set of shards. Each shard owns its
//! slice of the registry behind one lock, so inserting a new device and
//! appending to its buffer are observed together.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use super::types::SensorSample;

/// Default number of registry shards
pub const DEFAULT_SHARDS: usize = 16;

/// Immutable copy of a full device window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    samples: Arc<[SensorSample]>,
}

impl WindowSnapshot {
    pub fn new(samples: Vec<SensorSample>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    pub fn samples(&self) -> &[SensorSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

type Shard = HashMap<String, VecDeque<SensorSample>>;

/// Registry of bounded FIFO windows keyed by device id
pub struct WindowStore {
    capacity: usize,
    shards: Vec<Mutex<Shard>>,
}

impl WindowStore {
    pub fn new(capacity: usize) -> Self {
        Self::with_shards(capacity, DEFAULT_SHARDS)
    }

    pub fn with_shards(capacity: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            capacity,
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Window capacity shared by every device
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append samples for a device, evicting the oldest beyond capacity.
    ///
    /// Returns a snapshot only when the window is exactly full after the append.
    pub fn append(&self, device_id: &str, samples: &[SensorSample]) -> Option<WindowSnapshot> {
        let mut shard = self.shard_for(device_id).lock();

        let window = shard
            .entry(device_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        for sample in samples {
            if window.len() == self.capacity {
                window.pop_front();
            }
            window.push_back(*sample);
        }

        if self.capacity > 0 && window.len() == self.capacity {
            Some(WindowSnapshot::new(window.iter().copied().collect()))
        } else {
            None
        }
    }

    /// Number of samples currently buffered for a device
    pub fn buffered(&self, device_id: &str) -> usize {
        self.shard_for(device_id)
            .lock()
            .get(device_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Number of devices seen so far
    pub fn device_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    fn shard_for(&self, device_id: &str) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        device_id.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }
}
