// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Pipeline counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::detection::{ClassificationResult, DecisionSource, Label};

/// Lock-free counters shared by every pipeline stage
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
    malformed: AtomicU64,
    decisions: [AtomicU64; 6],
    rule_decisions: AtomicU64,
    classifier_calls: AtomicU64,
    audio_overrides: AtomicU64,
    classify_errors: AtomicU64,
    points_written: AtomicU64,
    sink_failures: AtomicU64,
}

fn label_slot(label: Label) -> usize {
    match label {
        Label::Fall => 0,
        Label::Walking => 1,
        Label::Inactivity => 2,
        Label::Restlessness => 3,
        Label::Buffering => 4,
        Label::Error => 5,
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        bump(&self.received, 1);
    }

    pub fn record_enqueued(&self) {
        bump(&self.enqueued, 1);
    }

    pub fn record_dropped(&self) {
        bump(&self.dropped, 1);
    }

    /// An older message was pushed out to make room
    pub fn record_evicted(&self) {
        bump(&self.evicted, 1);
    }

    pub fn record_malformed(&self) {
        bump(&self.malformed, 1);
    }

    pub fn record_decision(&self, result: &ClassificationResult) {
        bump(&self.decisions[label_slot(result.label)], 1);
        match result.source {
            DecisionSource::Rules => bump(&self.rule_decisions, 1),
            DecisionSource::Classifier => bump(&self.classifier_calls, 1),
            DecisionSource::Failed => bump(&self.classify_errors, 1),
            DecisionSource::Buffering => {}
        }
        if result.audio_override {
            bump(&self.audio_overrides, 1);
        }
    }

    pub fn record_written(&self, points: usize) {
        bump(&self.points_written, points as u64);
    }

    pub fn record_sink_failure(&self, points: usize) {
        bump(&self.sink_failures, points as u64);
    }

    pub fn decisions(&self, label: Label) -> u64 {
        self.decisions[label_slot(label)].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            received: load(&self.received),
            enqueued: load(&self.enqueued),
            dropped: load(&self.dropped),
            evicted: load(&self.evicted),
            malformed: load(&self.malformed),
            fall: self.decisions(Label::Fall),
            walking: self.decisions(Label::Walking),
            inactivity: self.decisions(Label::Inactivity),
            restlessness: self.decisions(Label::Restlessness),
            buffering: self.decisions(Label::Buffering),
            error: self.decisions(Label::Error),
            rule_decisions: load(&self.rule_decisions),
            classifier_calls: load(&self.classifier_calls),
            audio_overrides: load(&self.audio_overrides),
            classify_errors: load(&self.classify_errors),
            points_written: load(&self.points_written),
            sink_failures: load(&self.sink_failures),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub enqueued: u64,
    pub dropped: u64,
    pub evicted: u64,
    pub malformed: u64,
    pub fall: u64,
    pub walking: u64,
    pub inactivity: u64,
    pub restlessness: u64,
    pub buffering: u64,
    pub error: u64,
    pub rule_decisions: u64,
    pub classifier_calls: u64,
    pub audio_overrides: u64,
    pub classify_errors: u64,
    pub points_written: u64,
    pub sink_failures: u64,
}

impl StatsSnapshot {
    pub fn total_decisions(&self) -> u64 {
        self.fall + self.walking + self.inactivity + self.restlessness + self.buffering + self.error
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} enqueued={} dropped={} evicted={} malformed={} | \
             fall={} walking={} inactivity={} restlessness={} buffering={} error={} | \
             rules={} classifier={} audio={} | written={} sink_failures={}",
            self.received,
            self.enqueued,
            self.dropped,
            self.evicted,
            self.malformed,
            self.fall,
            self.walking,
            self.inactivity,
            self.restlessness,
            self.buffering,
            self.error,
            self.rule_decisions,
            self.classifier_calls,
            self.audio_overrides,
            self.points_written,
            self.sink_failures,
        )
    }
}
