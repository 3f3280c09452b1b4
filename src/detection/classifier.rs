// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Pretrained window classifier
//!
//! The offline trainer ships a matched pair of JSON artifacts: a reference
//! set for k-nearest-neighbour search under banded DTW, and the scaler the
//! references were normalised with. Both are read once at startup and are
//! immutable afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Label;
use crate::analysis::{dtw_distance, MinMaxScaler};
use crate::config::ModelConfig;
use crate::error::{ClassifyError, ModelError};
use crate::sensors::{WindowSnapshot, CHANNELS};

/// Anything that can turn a full window into an activity label
pub trait WindowClassifier: Send + Sync {
    fn classify(&self, window: &WindowSnapshot) -> Result<Label, ClassifyError>;
}

/// Classifier artifact as written by the trainer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    pub artifact_version: String,
    pub kind: String,
    pub n_neighbors: usize,
    pub sakoe_chiba_radius: usize,
    pub references: Vec<ReferenceSeries>,
}

/// One labelled, already-scaled training window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSeries {
    pub label: String,
    pub series: Vec<Vec<f64>>,
}

/// Scaler artifact as written by the trainer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub artifact_version: String,
    pub kind: String,
    pub value_range: (f64, f64),
}

const CLASSIFIER_KIND: &str = "knn_dtw";
const SCALER_KIND: &str = "min_max";

fn read_artifact<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ModelError> {
    if !path.exists() {
        return Err(ModelError::Missing(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ModelError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ModelError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// k-NN over DTW distance with per-series min-max scaling
#[derive(Debug, Clone)]
pub struct KnnDtwClassifier {
    version: String,
    scaler: MinMaxScaler,
    n_neighbors: usize,
    radius: usize,
    references: Vec<(Label, Array2<f64>)>,
}

impl KnnDtwClassifier {
    /// Load the artifact pair named by the model configuration
    pub fn load(config: &ModelConfig) -> Result<Self, ModelError> {
        let classifier: ClassifierArtifact = read_artifact(&config.classifier_path)?;
        let scaler: ScalerArtifact = read_artifact(&config.scaler_path)?;
        let model = Self::from_artifacts(classifier, scaler)?;

        info!(
            "Loaded model {} ({} references, k={}, radius={})",
            model.version,
            model.references.len(),
            model.n_neighbors,
            model.radius
        );
        Ok(model)
    }

    pub fn from_artifacts(
        classifier: ClassifierArtifact,
        scaler: ScalerArtifact,
    ) -> Result<Self, ModelError> {
        if classifier.artifact_version != scaler.artifact_version {
            return Err(ModelError::VersionMismatch {
                classifier: classifier.artifact_version,
                scaler: scaler.artifact_version,
            });
        }
        if classifier.kind != CLASSIFIER_KIND {
            return Err(ModelError::Invalid(format!(
                "unsupported classifier kind '{}'",
                classifier.kind
            )));
        }
        if scaler.kind != SCALER_KIND {
            return Err(ModelError::Invalid(format!(
                "unsupported scaler kind '{}'",
                scaler.kind
            )));
        }
        if classifier.n_neighbors == 0 {
            return Err(ModelError::Invalid("n_neighbors must be at least 1".into()));
        }
        if classifier.references.is_empty() {
            return Err(ModelError::Invalid("reference set is empty".into()));
        }

        let mut references = Vec::with_capacity(classifier.references.len());
        for (idx, reference) in classifier.references.into_iter().enumerate() {
            let label: Label = reference
                .label
                .parse()
                .ok()
                .filter(Label::is_activity)
                .ok_or_else(|| {
                    ModelError::Invalid(format!(
                        "reference {idx} has unknown label '{}'",
                        reference.label
                    ))
                })?;

            let steps = reference.series.len();
            if steps == 0 || reference.series.iter().any(|frame| frame.len() != CHANNELS) {
                return Err(ModelError::Invalid(format!(
                    "reference {idx} is not a non-empty ({steps} x {CHANNELS}) series"
                )));
            }
            let flat: Vec<f64> = reference.series.into_iter().flatten().collect();
            let series = Array2::from_shape_vec((steps, CHANNELS), flat)
                .map_err(|e| ModelError::Invalid(format!("reference {idx}: {e}")))?;
            references.push((label, series));
        }

        Ok(Self {
            version: classifier.artifact_version,
            scaler: MinMaxScaler::new(scaler.value_range.0, scaler.value_range.1),
            n_neighbors: classifier.n_neighbors,
            radius: classifier.sakoe_chiba_radius,
            references,
        })
    }

    /// Artifact version shared by the classifier and scaler
    pub fn version(&self) -> &str {
        &self.version
    }

    fn to_series(window: &WindowSnapshot) -> Result<Array2<f64>, ClassifyError> {
        let flat: Vec<f64> = window
            .samples()
            .iter()
            .flat_map(|s| s.channels().iter().copied())
            .collect();
        Array2::from_shape_vec((window.len(), CHANNELS), flat).map_err(|_| {
            ClassifyError::ChannelMismatch {
                expected: CHANNELS,
                got: window.samples().first().map(|s| s.channels().len()).unwrap_or(0),
            }
        })
    }
}

impl WindowClassifier for KnnDtwClassifier {
    fn classify(&self, window: &WindowSnapshot) -> Result<Label, ClassifyError> {
        if window.is_empty() {
            return Err(ClassifyError::EmptyWindow);
        }
        if self.references.is_empty() {
            return Err(ClassifyError::EmptyModel);
        }

        let series = Self::to_series(window)?;
        let scaled = self.scaler.transform(series.view());
        if scaled.iter().any(|v| !v.is_finite()) {
            return Err(ClassifyError::NonFinite("scaled window"));
        }

        let mut distances: Vec<(f64, Label)> = self
            .references
            .iter()
            .map(|(label, reference)| {
                (dtw_distance(scaled.view(), reference.view(), self.radius), *label)
            })
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Majority vote; ties go to the label that sorts first
        let mut votes: BTreeMap<&'static str, (usize, Label)> = BTreeMap::new();
        for (_, label) in distances.iter().take(self.n_neighbors) {
            votes.entry(label.as_str()).or_insert((0, *label)).0 += 1;
        }

        let mut best: Option<(usize, Label)> = None;
        for (count, label) in votes.into_values() {
            if best.map_or(true, |(top, _)| count > top) {
                best = Some((count, label));
            }
        }

        best.map(|(_, label)| label).ok_or(ClassifyError::EmptyModel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorSample;

    fn flat_series(steps: usize, level: f64) -> Vec<Vec<f64>> {
        (0..steps).map(|_| vec![level; CHANNELS]).collect()
    }

    fn ramp_series(steps: usize) -> Vec<Vec<f64>> {
        (0..steps)
            .map(|t| vec![t as f64 / (steps - 1) as f64; CHANNELS])
            .collect()
    }

    fn scaler() -> ScalerArtifact {
        ScalerArtifact {
            artifact_version: "v1".into(),
            kind: SCALER_KIND.into(),
            value_range: (0.0, 1.0),
        }
    }

    fn artifact(refs: Vec<(&str, Vec<Vec<f64>>)>, k: usize) -> ClassifierArtifact {
        ClassifierArtifact {
            artifact_version: "v1".into(),
            kind: CLASSIFIER_KIND.into(),
            n_neighbors: k,
            sakoe_chiba_radius: 2,
            references: refs
                .into_iter()
                .map(|(label, series)| ReferenceSeries {
                    label: label.into(),
                    series,
                })
                .collect(),
        }
    }

    fn ramp_window(steps: usize) -> WindowSnapshot {
        WindowSnapshot::new(
            (0..steps)
                .map(|t| {
                    let v = t as f64 * 3.0;
                    SensorSample::new([v, v, v], [v, v, v], v)
                })
                .collect(),
        )
    }

    #[test]
    fn test_nearest_neighbours_vote() {
        let model = KnnDtwClassifier::from_artifacts(
            artifact(
                vec![
                    ("walking", ramp_series(10)),
                    ("walking", ramp_series(10)),
                    ("inactivity", flat_series(10, 0.0)),
                ],
                3,
            ),
            scaler(),
        )
        .unwrap();

        assert_eq!(model.classify(&ramp_window(10)).unwrap(), Label::Walking);
    }

    #[test]
    fn test_tie_goes_to_first_label() {
        let model = KnnDtwClassifier::from_artifacts(
            artifact(
                vec![("walking", ramp_series(6)), ("inactivity", ramp_series(6))],
                2,
            ),
            scaler(),
        )
        .unwrap();

        assert_eq!(model.classify(&ramp_window(6)).unwrap(), Label::Inactivity);
    }

    #[test]
    fn test_rejects_mismatched_versions() {
        let mut scaler = scaler();
        scaler.artifact_version = "v2".into();
        let err = KnnDtwClassifier::from_artifacts(artifact(vec![("fall", ramp_series(4))], 1), scaler)
            .unwrap_err();
        assert!(matches!(err, ModelError::VersionMismatch { .. }));
    }

    #[test]
    fn test_rejects_bad_references() {
        let err = KnnDtwClassifier::from_artifacts(artifact(vec![("dancing", ramp_series(4))], 1), scaler())
            .unwrap_err();
        assert!(matches!(err, ModelError::Invalid(_)));

        let err = KnnDtwClassifier::from_artifacts(artifact(vec![("fall", vec![vec![0.0; 3]])], 1), scaler())
            .unwrap_err();
        assert!(matches!(err, ModelError::Invalid(_)));

        let err = KnnDtwClassifier::from_artifacts(artifact(vec![], 1), scaler()).unwrap_err();
        assert!(matches!(err, ModelError::Invalid(_)));
    }

    #[test]
    fn test_missing_artifact_fails_fast() {
        let dir = std::env::temp_dir().join(format!("fallwatch-model-{}", uuid::Uuid::new_v4()));
        let config = ModelConfig {
            classifier_path: dir.join("model.json"),
            scaler_path: dir.join("scaler.json"),
        };
        assert!(matches!(KnnDtwClassifier::load(&config), Err(ModelError::Missing(_))));
    }

    #[test]
    fn test_load_round_trips_through_files() {
        let dir = std::env::temp_dir().join(format!("fallwatch-model-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let config = ModelConfig {
            classifier_path: dir.join("model.json"),
            scaler_path: dir.join("scaler.json"),
        };
        let classifier = artifact(vec![("walking", ramp_series(8))], 1);
        std::fs::write(&config.classifier_path, serde_json::to_string(&classifier).unwrap()).unwrap();
        std::fs::write(&config.scaler_path, serde_json::to_string(&scaler()).unwrap()).unwrap();

        let model = KnnDtwClassifier::load(&config).unwrap();
        assert_eq!(model.version(), "v1");
        assert_eq!(model.classify(&ramp_window(8)).unwrap(), Label::Walking);

        std::fs::write(&config.scaler_path, "{ not json").unwrap();
        assert!(matches!(
            KnnDtwClassifier::load(&config),
            Err(ModelError::Malformed { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
