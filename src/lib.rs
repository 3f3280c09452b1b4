// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Fallwatch - Real-time fall and activity classification for wearables
//!
//! Wearables publish batches of fused inertial and audio samples over MQTT.
//! Each batch is windowed per device, judged by fast threshold rules and,
//! when the rules are inconclusive, by a pretrained k-NN / DTW classifier.
//! One decision per batch is written to InfluxDB.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Fallwatch Engine                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌────────────┐   ┌─────────────────────────┐ │
//! │  │   MQTT   │ → │ Dispatcher │ → │ Work Queue (bounded)    │ │
//! │  │  Ingress │   │            │   │ shared / topic affinity │ │
//! │  └──────────┘   └────────────┘   └─────────────────────────┘ │
//! │                                       ↓  ↓  ↓                │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ Worker Pool: decode → Window Store → Decision Engine   │  │
//! │  │              (rules → classifier → audio override)     │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                           ↓                                  │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ Telemetry Sink (batched async writes to InfluxDB)      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod analysis;
pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod sensors;
pub mod streaming;

// Re-exports for convenience
pub use config::Config;
pub use core::{Dispatcher, Engine, PipelineStats, StatsSnapshot};
pub use detection::{ClassificationResult, DecisionEngine, KnnDtwClassifier, Label, WindowClassifier};
pub use sensors::{BatchMessage, SensorSample, WindowStore};
pub use streaming::{InfluxWriter, MqttIngress, TelemetryPoint, TelemetrySink};

/// Fallwatch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fallwatch name
pub const NAME: &str = "Fallwatch";
