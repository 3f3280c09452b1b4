// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Threshold rules for the fast alarm path

use serde::{Deserialize, Serialize};

use crate::config::RuleConfig;
use crate::error::ClassifyError;
use crate::sensors::{SensorSample, WindowSnapshot};

/// Outcome of the rule pass over one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleVerdict {
    /// Rules are inconclusive, defer to the classifier
    None,
    /// Subject is stationary
    Inactivity,
    /// Impact signature matched
    Fall(FallSignature),
}

/// Which impact rule fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallSignature {
    /// Large impact combined with strong rotation
    RotationalTumble,
    /// Impact big enough on its own
    VerticalSlam,
}

/// Window-level reductions the rules look at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    /// max - min of the acceleration magnitude
    pub accel_range: f64,
    pub max_accel: f64,
    pub max_gyro: f64,
    /// Largest |az|
    pub max_abs_vertical_accel: f64,
    /// Largest |gy|
    pub max_abs_gyro_axis: f64,
}

impl WindowMetrics {
    pub fn compute(window: &WindowSnapshot) -> Result<Self, ClassifyError> {
        if window.is_empty() {
            return Err(ClassifyError::EmptyWindow);
        }

        let mut min_accel = f64::INFINITY;
        let mut max_accel = f64::NEG_INFINITY;
        let mut max_gyro = f64::NEG_INFINITY;
        let mut max_abs_vertical_accel = 0.0_f64;
        let mut max_abs_gyro_axis = 0.0_f64;

        for sample in window.samples() {
            let accel = sample.accel_magnitude();
            let gyro = sample.gyro_magnitude();
            if !accel.is_finite() {
                return Err(ClassifyError::NonFinite("acceleration magnitude"));
            }
            if !gyro.is_finite() {
                return Err(ClassifyError::NonFinite("angular-rate magnitude"));
            }

            min_accel = min_accel.min(accel);
            max_accel = max_accel.max(accel);
            max_gyro = max_gyro.max(gyro);

            let channels = sample.channels();
            max_abs_vertical_accel =
                max_abs_vertical_accel.max(channels[SensorSample::VERTICAL_ACCEL].abs());
            max_abs_gyro_axis = max_abs_gyro_axis.max(channels[SensorSample::TUMBLE_GYRO].abs());
        }

        Ok(Self {
            accel_range: max_accel - min_accel,
            max_accel,
            max_gyro,
            max_abs_vertical_accel,
            max_abs_gyro_axis,
        })
    }
}

/// Deterministic fall / inactivity detector
#[derive(Debug, Clone)]
pub struct RuleDetector {
    thresholds: RuleConfig,
}

impl RuleDetector {
    pub fn new(thresholds: RuleConfig) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, window: &WindowSnapshot) -> Result<RuleVerdict, ClassifyError> {
        let metrics = WindowMetrics::compute(window)?;
        Ok(self.judge(&metrics))
    }

    /// Apply the rules in order; the first match wins
    pub fn judge(&self, m: &WindowMetrics) -> RuleVerdict {
        let t = &self.thresholds;

        if m.accel_range < t.inactivity_range {
            return RuleVerdict::Inactivity;
        }

        let tumble = m.max_accel > t.tumble_accel
            && m.max_gyro > t.tumble_gyro
            && (m.max_abs_gyro_axis > t.tumble_gyro_axis
                || m.max_abs_vertical_accel > t.tumble_vertical_accel);
        if tumble {
            return RuleVerdict::Fall(FallSignature::RotationalTumble);
        }

        if m.max_accel > t.slam_accel {
            return RuleVerdict::Fall(FallSignature::VerticalSlam);
        }

        RuleVerdict::None
    }
}
