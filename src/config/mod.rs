// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Configuration module
//!
//! Settings come from a TOML file and are then overridden by `FALLWATCH_*`
//! environment variables, so credentials never have to live on disk.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::core::{BackpressurePolicy, Routing};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level
    pub log_level: String,

    /// Windowing, workers and queue
    pub pipeline: PipelineConfig,

    /// Rule thresholds and audio override
    pub rules: RuleConfig,

    /// Classifier artifact locations
    pub model: ModelConfig,

    /// Pub/sub ingress
    pub transport: TransportConfig,

    /// Time-series egress
    pub sink: SinkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            pipeline: PipelineConfig::default(),
            rules: RuleConfig::default(),
            model: ModelConfig::default(),
            transport: TransportConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {:?}", path))?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("fallwatch"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Apply `FALLWATCH_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{key} has invalid value '{value}'"))
        }

        if let Some(v) = lookup("FALLWATCH_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("FALLWATCH_WINDOW_SIZE") {
            self.pipeline.window_size = parse("FALLWATCH_WINDOW_SIZE", v)?;
        }
        if let Some(v) = lookup("FALLWATCH_WORKERS") {
            self.pipeline.worker_count = parse("FALLWATCH_WORKERS", v)?;
        }
        if let Some(v) = lookup("FALLWATCH_QUEUE_CAPACITY") {
            self.pipeline.queue_capacity = parse("FALLWATCH_QUEUE_CAPACITY", v)?;
        }
        if let Some(v) = lookup("FALLWATCH_CLASSIFIER_PATH") {
            self.model.classifier_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FALLWATCH_SCALER_PATH") {
            self.model.scaler_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FALLWATCH_MQTT_BROKER") {
            self.transport.broker = v;
        }
        if let Some(v) = lookup("FALLWATCH_MQTT_PORT") {
            self.transport.port = parse("FALLWATCH_MQTT_PORT", v)?;
        }
        if let Some(v) = lookup("FALLWATCH_MQTT_TOPIC") {
            self.transport.topic = v;
        }
        if let Some(v) = lookup("FALLWATCH_MQTT_USERNAME") {
            self.transport.username = Some(v);
        }
        if let Some(v) = lookup("FALLWATCH_MQTT_PASSWORD") {
            self.transport.password = Some(v);
        }
        if let Some(v) = lookup("FALLWATCH_INFLUX_URL") {
            self.sink.url = v;
        }
        if let Some(v) = lookup("FALLWATCH_INFLUX_TOKEN") {
            self.sink.token = v;
        }
        if let Some(v) = lookup("FALLWATCH_INFLUX_ORG") {
            self.sink.org = v;
        }
        if let Some(v) = lookup("FALLWATCH_INFLUX_BUCKET") {
            self.sink.bucket = v;
        }
        Ok(())
    }

    /// Tracing filter for `log_level`.
    ///
    /// Accepts full directives such as `info,fallwatch::core=debug`; an
    /// unparsable value falls back to `info`.
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.window_size == 0 {
            bail!("pipeline.window_size must be at least 1");
        }
        if self.pipeline.worker_count == 0 {
            bail!("pipeline.worker_count must be at least 1");
        }
        if self.pipeline.queue_capacity == 0 {
            bail!("pipeline.queue_capacity must be at least 1");
        }
        if self.transport.topic.trim().is_empty() {
            bail!("transport.topic must not be empty");
        }
        if self.sink.measurement.trim().is_empty() {
            bail!("sink.measurement must not be empty");
        }
        if self.sink.max_batch == 0 {
            bail!("sink.max_batch must be at least 1");
        }
        if self.sink.queue_capacity == 0 {
            bail!("sink.queue_capacity must be at least 1");
        }
        if self.rules.sound_ceiling < 0 {
            bail!("rules.sound_ceiling must not be negative");
        }
        Ok(())
    }
}

/// Windowing, worker pool and work queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples per device window
    pub window_size: usize,

    /// Number of worker threads
    pub worker_count: usize,

    /// Maximum queued messages per lane
    pub queue_capacity: usize,

    /// What to do when a lane is full
    pub backpressure: BackpressurePolicy,

    /// How messages are assigned to workers
    pub routing: Routing,

    /// Lock shards in the window registry
    pub window_shards: usize,

    /// Seconds between stats log lines (0 disables)
    pub stats_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: 150,
            worker_count: 8,
            queue_capacity: 10_000,
            backpressure: BackpressurePolicy::DropOldest,
            routing: Routing::Shared,
            window_shards: 16,
            stats_interval_secs: 60,
        }
    }
}

/// Rule thresholds and the audio override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Acceleration magnitude range below which the subject is stationary
    pub inactivity_range: f64,

    /// Tumble: minimum peak acceleration magnitude
    pub tumble_accel: f64,

    /// Tumble: minimum peak angular-rate magnitude
    pub tumble_gyro: f64,

    /// Tumble: peak |gy| that confirms rotation
    pub tumble_gyro_axis: f64,

    /// Tumble: peak |az| that confirms impact
    pub tumble_vertical_accel: f64,

    /// Slam: peak acceleration magnitude that is a fall on its own
    pub slam_accel: f64,

    /// Sound sensor ceiling
    pub sound_ceiling: i64,

    /// Sound level above which benign labels become restlessness
    pub restlessness_sound: i64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            inactivity_range: 6.0,
            tumble_accel: 70.0,
            tumble_gyro: 140.0,
            tumble_gyro_axis: 200.0,
            tumble_vertical_accel: 50.0,
            slam_accel: 125.0,
            sound_ceiling: 1023,
            restlessness_sound: 50,
        }
    }
}

/// Model artifact paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub classifier_path: PathBuf,
    pub scaler_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            classifier_path: PathBuf::from("./models/fast_model_v1.json"),
            scaler_path: PathBuf::from("./models/fast_scaler_v1.json"),
        }
    }
}

/// MQTT ingress configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub broker: String,
    pub port: u16,
    /// Client id; a random suffix is appended when empty
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub topic: String,
    pub keep_alive_secs: u64,
    /// Startup fails if the broker has not acknowledged within this time
    pub connect_timeout_secs: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 8883,
            client_id: String::new(),
            username: None,
            password: None,
            use_tls: true,
            topic: "iot/fall_detection".to_string(),
            keep_alive_secs: 60,
            connect_timeout_secs: 15,
            reconnect_delay_ms: 5000,
        }
    }
}

/// InfluxDB egress configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub measurement: String,
    /// Add the device id as a tag on every point
    pub tag_device: bool,
    /// Most points sent in one write
    pub max_batch: usize,
    /// Points waiting to be written; further points are dropped
    pub queue_capacity: usize,
    pub timeout_secs: u64,
    /// How long shutdown waits for the backlog to be written
    pub close_timeout_secs: u64,
    /// Fail startup if the store health check does not pass
    pub verify_on_startup: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "NCSU".to_string(),
            bucket: "iot_data".to_string(),
            measurement: "patient_activity".to_string(),
            tag_device: false,
            max_batch: 500,
            queue_capacity: 10_000,
            timeout_secs: 10,
            close_timeout_secs: 15,
            verify_on_startup: true,
        }
    }
}
