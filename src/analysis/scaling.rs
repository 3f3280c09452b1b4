// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Min-max scaling of multivariate time series

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Rescales every channel of a series into `value_range`.
///
/// Each series is scaled on its own (min and max are taken over its time
/// axis), so there is nothing to fit beyond the target range. A constant
/// channel maps to the lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub value_range: (f64, f64),
}

impl Default for MinMaxScaler {
    fn default() -> Self {
        Self {
            value_range: (0.0, 1.0),
        }
    }
}

impl MinMaxScaler {
    pub fn new(low: f64, high: f64) -> Self {
        Self {
            value_range: (low, high),
        }
    }

    /// Scale a `(timesteps, channels)` series
    pub fn transform(&self, series: ArrayView2<'_, f64>) -> Array2<f64> {
        let (low, high) = self.value_range;
        let mut out = series.to_owned();

        for mut column in out.axis_iter_mut(Axis(1)) {
            let min = column.iter().copied().fold(f64::INFINITY, f64::min);
            let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mut range = max - min;
            if range == 0.0 {
                range = 1.0;
            }
            column.mapv_inplace(|v| (v - min) * (high - low) / range + low);
        }

        out
    }
}
