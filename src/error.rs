// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Error types for each pipeline stage
//!
//! Every stage returns its own error kind so failures stay observable
//! (counters, logs, tests) without ever aborting a worker loop.

use std::path::PathBuf;
use thiserror::Error;

/// Ingress payload could not be turned into a batch
#[derive(Debug, Error)]
pub enum IngestError {
    /// Payload is not valid UTF-8
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Payload is not JSON or violates the batch schema
    #[error("payload does not match the batch schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Window math or classifier invocation failed
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Window has no samples to reduce
    #[error("window is empty")]
    EmptyWindow,

    /// A derived signal was NaN or infinite
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    /// Window shape differs from what the model was trained on
    #[error("window has {got} channels, model expects {expected}")]
    ChannelMismatch {
        /// Channels the model was fitted on
        expected: usize,
        /// Channels present in the window
        got: usize,
    },

    /// Classifier has no usable references
    #[error("model has no reference series")]
    EmptyModel,

    /// Classifier panicked while running
    #[error("classifier panicked: {0}")]
    Panicked(String),
}

/// Telemetry write failed
#[derive(Debug, Error)]
pub enum SinkError {
    /// Transport-level failure talking to the store
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Store answered with a non-success status
    #[error("store rejected write ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Sink was already closed
    #[error("sink is closed")]
    Closed,
}

/// Model artifact could not be loaded
#[derive(Debug, Error)]
pub enum ModelError {
    /// Artifact file does not exist
    #[error("model artifact not found: {0:?}")]
    Missing(PathBuf),

    /// Artifact file exists but could not be read
    #[error("failed to read model artifact {path:?}: {source}")]
    Unreadable {
        /// File that failed
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Artifact content is not a valid artifact document
    #[error("invalid model artifact {path:?}: {source}")]
    Malformed {
        /// File that failed
        path: PathBuf,
        /// Underlying parse error
        source: serde_json::Error,
    },

    /// Artifact parsed but is semantically unusable
    #[error("invalid model artifact: {0}")]
    Invalid(String),

    /// Classifier and scaler come from different training runs
    #[error("classifier version {classifier} does not match scaler version {scaler}")]
    VersionMismatch {
        /// Version recorded in the classifier file
        classifier: String,
        /// Version recorded in the scaler file
        scaler: String,
    },
}

/// Transport could not be brought up
#[derive(Debug, Error)]
pub enum TransportError {
    /// Broker refused or never answered the connection
    #[error("broker connection failed: {0}")]
    Connect(String),

    /// No ConnAck arrived within the connect timeout
    #[error("no connection acknowledgement from {broker} within {secs}s")]
    Timeout {
        /// Broker address
        broker: String,
        /// Timeout that elapsed
        secs: u64,
    },

    /// Subscribe request could not be queued
    #[error("subscribe failed: {0}")]
    Subscribe(#[from] rumqttc::ClientError),
}
