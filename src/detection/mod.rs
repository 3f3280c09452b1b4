//! Detection module - rule fast path, trained classifier and final decision

mod classifier;
mod rules;

pub use classifier::*;
pub use rules::*;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RuleConfig;
use crate::error::ClassifyError;
use crate::sensors::{AuxiliaryReadings, WindowSnapshot};

/// Closed set of decision labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Fall,
    Walking,
    Inactivity,
    Restlessness,
    /// Window not full yet
    Buffering,
    /// Window math or classifier failed
    Error,
}

impl Label {
    pub const ALL: [Label; 6] = [
        Label::Fall,
        Label::Walking,
        Label::Inactivity,
        Label::Restlessness,
        Label::Buffering,
        Label::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Fall => "fall",
            Label::Walking => "walking",
            Label::Inactivity => "inactivity",
            Label::Restlessness => "restlessness",
            Label::Buffering => "buffering",
            Label::Error => "error",
        }
    }

    /// Labels a classifier may legitimately produce
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            Label::Fall | Label::Walking | Label::Inactivity | Label::Restlessness
        )
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| format!("unknown label '{s}'"))
    }
}

/// Which stage produced the label before any audio override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionSource {
    Buffering,
    Rules,
    Classifier,
    Failed,
}

/// One decision per processed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub device_id: String,
    pub label: Label,
    pub source: DecisionSource,
    /// Label was replaced by restlessness because the batch was loud
    pub audio_override: bool,
    pub steps: i64,
    pub bpm: i64,
    /// Loudest sample, clamped to the sensor ceiling
    pub sound_level: i64,
    pub timestamp_ms: i64,
}

/// Combines the rule pass, the classifier and the audio override
pub struct DecisionEngine {
    rules: RuleDetector,
    classifier: Arc<dyn WindowClassifier>,
    sound_ceiling: i64,
    restlessness_sound: i64,
}

impl DecisionEngine {
    pub fn new(config: &RuleConfig, classifier: Arc<dyn WindowClassifier>) -> Self {
        Self {
            rules: RuleDetector::new(config.clone()),
            classifier,
            sound_ceiling: config.sound_ceiling,
            restlessness_sound: config.restlessness_sound,
        }
    }

    pub fn decide(
        &self,
        device_id: &str,
        window: Option<&WindowSnapshot>,
        aux: &AuxiliaryReadings,
    ) -> ClassificationResult {
        let sound_level = aux.max_sound.clamp(0, self.sound_ceiling);

        let (mut label, source) = match window {
            None => (Label::Buffering, DecisionSource::Buffering),
            Some(window) => match self.classify_window(window) {
                Ok(decided) => decided,
                Err(e) => {
                    warn!("Classification failed for {}: {}", device_id, e);
                    (Label::Error, DecisionSource::Failed)
                }
            },
        };

        let audio_override = self.overrides(label, source, sound_level);
        if audio_override {
            label = Label::Restlessness;
        }

        if label == Label::Fall {
            warn!("FALL detected for {} via {:?}", device_id, source);
        } else {
            debug!(
                "{} -> {} ({:?}, audio override: {})",
                device_id, label, source, audio_override
            );
        }

        ClassificationResult {
            device_id: device_id.to_string(),
            label,
            source,
            audio_override,
            steps: aux.steps,
            bpm: aux.bpm,
            sound_level,
            timestamp_ms: aux.timestamp_ms,
        }
    }

    fn classify_window(
        &self,
        window: &WindowSnapshot,
    ) -> Result<(Label, DecisionSource), ClassifyError> {
        match self.rules.evaluate(window)? {
            RuleVerdict::Inactivity => return Ok((Label::Inactivity, DecisionSource::Rules)),
            RuleVerdict::Fall(_) => return Ok((Label::Fall, DecisionSource::Rules)),
            RuleVerdict::None => {}
        }

        let classifier = Arc::clone(&self.classifier);
        let label = panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(window)))
            .map_err(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                ClassifyError::Panicked(message)
            })??;

        Ok((label, DecisionSource::Classifier))
    }

    /// Loud surroundings turn a decided benign label into restlessness, never a fall
    fn overrides(&self, label: Label, source: DecisionSource, sound_level: i64) -> bool {
        let decided = matches!(source, DecisionSource::Rules | DecisionSource::Classifier);
        decided && label != Label::Fall && sound_level > self.restlessness_sound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorSample;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Classifier stub that records how often it runs
    struct FixedClassifier {
        label: Label,
        calls: AtomicUsize,
    }

    impl FixedClassifier {
        fn new(label: Label) -> Arc<Self> {
            Arc::new(Self {
                label,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl WindowClassifier for FixedClassifier {
        fn classify(&self, _window: &WindowSnapshot) -> Result<Label, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.label)
        }
    }

    struct PanickingClassifier;

    impl WindowClassifier for PanickingClassifier {
        fn classify(&self, _window: &WindowSnapshot) -> Result<Label, ClassifyError> {
            panic!("index out of bounds");
        }
    }

    fn aux(max_sound: i64) -> AuxiliaryReadings {
        AuxiliaryReadings {
            steps: 12,
            bpm: 80,
            max_sound,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    /// Alternating gait-like window: dynamic range 30, no impact
    fn walking_window() -> WindowSnapshot {
        WindowSnapshot::new(
            (0..150)
                .map(|i| {
                    let az = if i % 2 == 0 { 5.0 } else { 35.0 };
                    SensorSample::new([0.0, 0.0, az], [20.0, 10.0, 5.0], 10.0)
                })
                .collect(),
        )
    }

    fn tumble_window() -> WindowSnapshot {
        let mut samples: Vec<_> = (0..150)
            .map(|_| SensorSample::new([0.0, 0.0, 9.8], [0.0, 0.0, 0.0], 0.0))
            .collect();
        samples[40] = SensorSample::new([80.0, 0.0, 0.0], [0.0, 210.0, 0.0], 0.0);
        WindowSnapshot::new(samples)
    }

    #[test]
    fn test_buffering_without_window() {
        let classifier = FixedClassifier::new(Label::Walking);
        let engine = DecisionEngine::new(&RuleConfig::default(), classifier.clone());

        let result = engine.decide("dev", None, &aux(0));
        assert_eq!(result.label, Label::Buffering);
        assert_eq!(result.source, DecisionSource::Buffering);
        assert_eq!(result.steps, 12);
        assert_eq!(result.bpm, 80);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rule_fall_short_circuits_classifier() {
        let classifier = FixedClassifier::new(Label::Walking);
        let engine = DecisionEngine::new(&RuleConfig::default(), classifier.clone());

        let result = engine.decide("dev", Some(&tumble_window()), &aux(0));
        assert_eq!(result.label, Label::Fall);
        assert_eq!(result.source, DecisionSource::Rules);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_classifier_used_when_rules_defer() {
        let classifier = FixedClassifier::new(Label::Walking);
        let engine = DecisionEngine::new(&RuleConfig::default(), classifier.clone());

        let result = engine.decide("dev", Some(&walking_window()), &aux(20));
        assert_eq!(result.label, Label::Walking);
        assert_eq!(result.source, DecisionSource::Classifier);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_loud_batch_overrides_to_restlessness() {
        let engine = DecisionEngine::new(&RuleConfig::default(), FixedClassifier::new(Label::Walking));

        let result = engine.decide("dev", Some(&walking_window()), &aux(60));
        assert_eq!(result.label, Label::Restlessness);
        assert_eq!(result.source, DecisionSource::Classifier);
        assert!(result.audio_override);
        assert_eq!(result.sound_level, 60);
    }

    #[test]
    fn test_loud_batch_never_masks_a_fall() {
        let engine = DecisionEngine::new(&RuleConfig::default(), FixedClassifier::new(Label::Fall));
        let result = engine.decide("dev", Some(&walking_window()), &aux(60));
        assert_eq!(result.label, Label::Fall);

        let engine = DecisionEngine::new(&RuleConfig::default(), FixedClassifier::new(Label::Walking));
        let result = engine.decide("dev", Some(&tumble_window()), &aux(900));
        assert_eq!(result.label, Label::Fall);
    }

    #[test]
    fn test_override_keeps_the_deciding_stage() {
        let classifier = FixedClassifier::new(Label::Walking);
        let engine = DecisionEngine::new(&RuleConfig::default(), classifier.clone());

        let still = WindowSnapshot::new(
            (0..150)
                .map(|_| SensorSample::new([0.0, 0.0, 9.8], [0.0, 0.0, 0.0], 0.0))
                .collect(),
        );
        let result = engine.decide("dev", Some(&still), &aux(75));
        assert_eq!(result.label, Label::Restlessness);
        assert_eq!(result.source, DecisionSource::Rules);
        assert!(result.audio_override);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);

        // Buffering is reported as is, however loud
        let result = engine.decide("dev", None, &aux(900));
        assert_eq!(result.label, Label::Buffering);
        assert!(!result.audio_override);
    }

    #[test]
    fn test_sound_is_clamped_to_ceiling() {
        let engine = DecisionEngine::new(&RuleConfig::default(), FixedClassifier::new(Label::Walking));
        assert_eq!(engine.decide("dev", None, &aux(5000)).sound_level, 1023);
        assert_eq!(engine.decide("dev", None, &aux(-4)).sound_level, 0);
    }

    #[test]
    fn test_classifier_panic_becomes_error_label() {
        let engine = DecisionEngine::new(&RuleConfig::default(), Arc::new(PanickingClassifier));

        let result = engine.decide("dev", Some(&walking_window()), &aux(0));
        assert_eq!(result.label, Label::Error);
        assert_eq!(result.source, DecisionSource::Failed);
    }

    #[test]
    fn test_label_round_trip() {
        for label in Label::ALL {
            assert_eq!(label.as_str().parse::<Label>().unwrap(), label);
        }
        assert!("jogging".parse::<Label>().is_err());
        assert_eq!(serde_json::to_string(&Label::Restlessness).unwrap(), "\"restlessness\"");
    }
}
