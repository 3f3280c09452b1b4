// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Sample and batch types shared by the ingestion and detection paths

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Number of fused channels in one sample
pub const CHANNELS: usize = 7;

/// Device id used when a batch does not name its sender
pub const UNKNOWN_DEVICE: &str = "unknown_device";

/// One fused wearable sample: 3-axis acceleration, 3-axis angular rate, sound
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample([f64; CHANNELS]);

impl SensorSample {
    /// Channel index of vertical acceleration
    pub const VERTICAL_ACCEL: usize = 2;
    /// Channel index of the angular-rate axis used by the tumble rule
    pub const TUMBLE_GYRO: usize = 4;
    /// Channel index of the sound level
    pub const SOUND: usize = 6;

    pub fn new(accel: [f64; 3], gyro: [f64; 3], sound: f64) -> Self {
        Self([accel[0], accel[1], accel[2], gyro[0], gyro[1], gyro[2], sound])
    }

    pub fn channels(&self) -> &[f64; CHANNELS] {
        &self.0
    }

    pub fn accel(&self) -> [f64; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    pub fn gyro(&self) -> [f64; 3] {
        [self.0[3], self.0[4], self.0[5]]
    }

    pub fn sound(&self) -> f64 {
        self.0[Self::SOUND]
    }

    /// Euclidean norm of the acceleration channels
    pub fn accel_magnitude(&self) -> f64 {
        norm(self.accel())
    }

    /// Euclidean norm of the angular-rate channels
    pub fn gyro_magnitude(&self) -> f64 {
        norm(self.gyro())
    }
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Scalars that travel with a batch but are not windowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryReadings {
    /// Step counter reported by the device
    pub steps: i64,
    /// Heart rate of the last sample in the batch
    pub bpm: i64,
    /// Loudest sample in the batch, before clamping
    pub max_sound: i64,
    /// Batch timestamp in milliseconds
    pub timestamp_ms: i64,
}

/// A decoded ingress message
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMessage {
    pub device_id: String,
    pub samples: Vec<SensorSample>,
    pub aux: AuxiliaryReadings,
}

/// Wire shape of one entry in `data_batch`
#[derive(Debug, Deserialize)]
struct RawSample {
    ax: f64,
    ay: f64,
    az: f64,
    gx: f64,
    gy: f64,
    gz: f64,
    #[serde(default)]
    sound: Option<f64>,
    #[serde(default)]
    bpm: Option<f64>,
}

/// Wire shape of a whole ingress message
#[derive(Debug, Deserialize)]
struct RawBatch {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    batch_ts: Option<i64>,
    #[serde(default)]
    steps: i64,
    #[serde(default)]
    data_batch: Vec<RawSample>,
}

impl BatchMessage {
    /// Decode an ingress payload.
    ///
    /// `received_at_ms` stands in for `batch_ts` when the device omits it.
    pub fn decode(payload: &[u8], received_at_ms: i64) -> Result<Self, IngestError> {
        let text = std::str::from_utf8(payload)?;
        let raw: RawBatch = serde_json::from_str(text)?;

        let bpm = raw
            .data_batch
            .last()
            .and_then(|s| s.bpm)
            .map(|b| b as i64)
            .unwrap_or(0);

        let max_sound = raw
            .data_batch
            .iter()
            .map(|s| s.sound.unwrap_or(0.0) as i64)
            .max()
            .unwrap_or(0);

        let samples = raw
            .data_batch
            .iter()
            .map(|s| {
                let sound = s.sound.unwrap_or(0.0).trunc();
                SensorSample::new([s.ax, s.ay, s.az], [s.gx, s.gy, s.gz], sound)
            })
            .collect();

        Ok(Self {
            device_id: raw.device_id.unwrap_or_else(|| UNKNOWN_DEVICE.to_string()),
            samples,
            aux: AuxiliaryReadings {
                steps: raw.steps,
                bpm,
                max_sound,
                timestamp_ms: raw.batch_ts.unwrap_or(received_at_ms),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_batch() {
        let payload = br#"{
            "device_id": "wrist-7",
            "batch_ts": 1700000000123,
            "steps": 42,
            "data_batch": [
                {"ax": 1.0, "ay": 2.0, "az": 2.0, "gx": 0.0, "gy": 3.0, "gz": 4.0, "sound": 12, "bpm": 70},
                {"ax": 0.5, "ay": 0.5, "az": 9.8, "gx": 1.0, "gy": 1.0, "gz": 1.0, "sound": 61.9, "bpm": 72}
            ]
        }"#;

        let batch = BatchMessage::decode(payload, 0).unwrap();
        assert_eq!(batch.device_id, "wrist-7");
        assert_eq!(batch.samples.len(), 2);
        assert_eq!(batch.aux.steps, 42);
        assert_eq!(batch.aux.bpm, 72);
        assert_eq!(batch.aux.max_sound, 61);
        assert_eq!(batch.aux.timestamp_ms, 1700000000123);
        assert!((batch.samples[0].accel_magnitude() - 3.0).abs() < 1e-9);
        assert!((batch.samples[0].gyro_magnitude() - 5.0).abs() < 1e-9);
        assert_eq!(batch.samples[1].sound(), 61.0);
    }

    #[test]
    fn test_decode_defaults() {
        let payload = br#"{"data_batch": [{"ax": 0, "ay": 0, "az": 1, "gx": 0, "gy": 0, "gz": 0}]}"#;

        let batch = BatchMessage::decode(payload, 555).unwrap();
        assert_eq!(batch.device_id, UNKNOWN_DEVICE);
        assert_eq!(batch.aux.timestamp_ms, 555);
        assert_eq!(batch.aux.steps, 0);
        assert_eq!(batch.aux.bpm, 0);
        assert_eq!(batch.aux.max_sound, 0);
        assert_eq!(batch.samples[0].sound(), 0.0);
    }

    #[test]
    fn test_decode_null_sound_reads_as_silence() {
        let payload = br#"{"device_id": "d", "data_batch": [
            {"ax": 0, "ay": 0, "az": 1, "gx": 0, "gy": 0, "gz": 0, "sound": null, "bpm": null},
            {"ax": 0, "ay": 0, "az": 1, "gx": 0, "gy": 0, "gz": 0, "sound": 33.5}
        ]}"#;

        let batch = BatchMessage::decode(payload, 0).unwrap();
        assert_eq!(batch.samples.len(), 2);
        assert_eq!(batch.samples[0].sound(), 0.0);
        assert_eq!(batch.samples[1].sound(), 33.0);
        assert_eq!(batch.aux.max_sound, 33);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            BatchMessage::decode(b"not json at all", 0),
            Err(IngestError::Schema(_))
        ));
        assert!(matches!(
            BatchMessage::decode(&[0xff, 0xfe, 0x00], 0),
            Err(IngestError::Utf8(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_axis() {
        let payload = br#"{"device_id": "d", "data_batch": [{"ax": 1, "ay": 1, "gx": 0, "gy": 0, "gz": 0}]}"#;
        assert!(BatchMessage::decode(payload, 0).is_err());
    }
}
