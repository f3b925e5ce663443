pub mod pool;
pub mod strategy;
pub mod types;

use std::sync::Mutex;

use chrono::Duration;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::AnomalyConfig;
use crate::error::{EngineError, EngineResult};
use crate::pattern;
use crate::stats::{mean, std_dev, temporal_consistency};
use crate::types::{DataPoint, TimeRange};
use crate::window::WindowStore;

pub use pool::ScoringPool;
pub use strategy::{strategy_for, ScoringStrategy};
pub use types::{
    Anomaly, AnomalyPattern, AnomalySeverity, AnomalySummary, DetectionModel, DetectionType,
    Detector, DetectorUpdate,
};

/// Below this many training points the reported accuracy is a flat 0.5
const MIN_ACCURACY_SAMPLES: usize = 10;
const MIN_PATTERN_ANOMALIES: usize = 3;
const BURST_SPAN_MINUTES: i64 = 10;
const BURST_MIN_COUNT: usize = 5;

/// Owns detectors, their trained models, their scoring windows and every
/// anomaly they have raised.
pub struct AnomalyDetectorService {
    config: AnomalyConfig,
    clock: SharedClock,
    detectors: DashMap<String, Detector>,
    models: DashMap<String, DetectionModel>,
    /// detector id -> anomalies in detection order
    anomalies: DashMap<String, Vec<Anomaly>>,
    /// anomaly id -> detector id
    anomaly_index: DashMap<String, String>,
    windows: WindowStore<DataPoint>,
    rng: Mutex<StdRng>,
}

impl AnomalyDetectorService {
    pub fn new(config: &AnomalyConfig, clock: SharedClock) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, clock, rng)
    }

    /// Use an explicit random source for the randomized strategies
    pub fn with_rng(config: &AnomalyConfig, clock: SharedClock, rng: StdRng) -> Self {
        Self {
            config: config.clone(),
            clock,
            detectors: DashMap::new(),
            models: DashMap::new(),
            anomalies: DashMap::new(),
            anomaly_index: DashMap::new(),
            windows: WindowStore::new(Duration::minutes(config.window_minutes as i64), 0),
            rng: Mutex::new(rng),
        }
    }

    pub fn create_detector(
        &self,
        name: &str,
        data_source: &str,
        detection_type: DetectionType,
        sensitivity: Option<f64>,
    ) -> EngineResult<String> {
        let sensitivity = sensitivity.unwrap_or(self.config.default_sensitivity);
        validate_sensitivity(sensitivity)?;

        let detector = Detector {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            data_source: data_source.to_string(),
            detection_type,
            sensitivity,
            window_minutes: self.config.window_minutes,
            is_active: true,
            created_at: self.clock.now(),
        };
        let id = detector.id.clone();
        tracing::info!(
            detector_id = %id,
            name,
            data_source,
            detection_type = %detection_type,
            sensitivity,
            "Created anomaly detector"
        );
        self.detectors.insert(id.clone(), detector);
        Ok(id)
    }

    pub fn get_detector(&self, id: &str) -> EngineResult<Detector> {
        self.detectors
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| EngineError::not_found("detector", id))
    }

    pub fn list_detectors(&self) -> Vec<Detector> {
        let mut all: Vec<Detector> = self.detectors.iter().map(|d| d.clone()).collect();
        all.sort_by_key(|d| d.created_at);
        all
    }

    pub fn update_detector(&self, id: &str, update: DetectorUpdate) -> EngineResult<Detector> {
        if let Some(s) = update.sensitivity {
            validate_sensitivity(s)?;
        }
        let mut detector = self.detectors
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("detector", id))?;
        if let Some(name) = update.name {
            detector.name = name;
        }
        if let Some(s) = update.sensitivity {
            detector.sensitivity = s;
        }
        if let Some(active) = update.is_active {
            detector.is_active = active;
        }
        Ok(detector.clone())
    }

    /// Remove a detector, its model and window. Raised anomalies are kept.
    pub fn delete_detector(&self, id: &str) -> EngineResult<()> {
        self.detectors
            .remove(id)
            .ok_or_else(|| EngineError::not_found("detector", id))?;
        self.models.remove(id);
        self.windows.remove(id);
        tracing::info!(detector_id = %id, "Deleted anomaly detector");
        Ok(())
    }

    /// Train (or retrain) a detector's model.
    ///
    /// The training points are stored verbatim. `accuracy` is a leave-one-out
    /// check against the same data: each held-out point's "truth" is whether
    /// it sits more than 2σ from the rest, compared with `score > 0.5`. There
    /// is no separate validation set, so the figure only describes how well
    /// the strategy agrees with a 2σ rule on its own training data.
    pub fn train_model(
        &self,
        detector_id: &str,
        training: Vec<DataPoint>,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> EngineResult<DetectionModel> {
        let detector = self.get_detector(detector_id)?;
        let strategy = strategy_for(detector.detection_type, &self.config);
        let values: Vec<f64> = training.iter().map(|p| p.value).collect();

        let accuracy = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            leave_one_out_accuracy(strategy.as_ref(), &values, &mut *rng)
        };

        let model = DetectionModel {
            id: Uuid::new_v4().to_string(),
            detector_id: detector_id.to_string(),
            model_type: detector.detection_type,
            is_ready: !training.is_empty(),
            training_data: training,
            trained_at: self.clock.now(),
            accuracy,
            parameters,
        };

        tracing::info!(
            detector_id,
            model_id = %model.id,
            samples = model.training_data.len(),
            accuracy = model.accuracy,
            "Trained detection model"
        );
        self.models.insert(detector_id.to_string(), model.clone());
        Ok(model)
    }

    pub fn get_model(&self, detector_id: &str) -> EngineResult<Option<DetectionModel>> {
        self.get_detector(detector_id)?;
        Ok(self.models.get(detector_id).map(|m| m.clone()))
    }

    /// Score a value against a detector's ready model.
    ///
    /// If the value also occurs in the training data, one occurrence is held
    /// out, so a point is never compared against itself. The hold-out only
    /// applies on exact equality, so scores can jump between a training value
    /// and a value next to it: against `[10, 10, 11, 9, 10, 50]` the
    /// statistical strategy scores 50 at 1.0 but 49.99 at about 0.745.
    pub fn score(&self, detector_id: &str, value: f64) -> EngineResult<f64> {
        let detector = self.get_detector(detector_id)?;
        let training = {
            let model = self.models
                .get(detector_id)
                .filter(|m| m.is_ready)
                .ok_or_else(|| EngineError::NotReady(detector_id.to_string()))?;
            model.values()
        };
        let reference = hold_out(&training, value);
        let strategy = strategy_for(detector.detection_type, &self.config);
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        Ok(strategy.score(value, &reference, &mut *rng))
    }

    /// Score a point and record an anomaly when the score exceeds the
    /// detector's sensitivity.
    ///
    /// A point already older than the detector's window is stale and is
    /// neither recorded nor added to the window.
    pub fn detect_anomaly(&self, detector_id: &str, point: DataPoint) -> EngineResult<Option<Anomaly>> {
        let detector = self.get_detector(detector_id)?;
        if !detector.is_active {
            return Err(EngineError::Inactive { kind: "detector", id: detector_id.to_string() });
        }
        let score = self.score(detector_id, point.value)?;

        let now = self.clock.now();
        if point.timestamp < now - Duration::minutes(detector.window_minutes as i64) {
            tracing::debug!(detector_id, point_id = %point.id, "Skipping stale point");
            return Ok(None);
        }
        self.windows.add(detector_id, point.clone(), now);

        if score <= detector.sensitivity {
            return Ok(None);
        }

        let mut data_point = point;
        data_point.is_anomaly = true;
        let anomaly = Anomaly {
            id: Uuid::new_v4().to_string(),
            detector_id: detector_id.to_string(),
            data_point,
            score,
            severity: AnomalySeverity::from_score(score),
            detected_at: now,
            is_resolved: false,
            resolution: None,
            resolved_by: None,
            resolved_at: None,
        };

        tracing::info!(
            detector_id,
            anomaly_id = %anomaly.id,
            score,
            severity = %anomaly.severity,
            value = anomaly.data_point.value,
            "Anomaly detected"
        );
        self.anomaly_index.insert(anomaly.id.clone(), detector_id.to_string());
        self.anomalies
            .entry(detector_id.to_string())
            .or_default()
            .push(anomaly.clone());
        Ok(Some(anomaly))
    }

    /// Rescore every point in a detector's window without raising anomalies
    pub fn scan_window(&self, detector_id: &str) -> EngineResult<Vec<(DataPoint, f64)>> {
        self.get_detector(detector_id)?;
        self.windows.prune(detector_id, self.clock.now());
        self.windows
            .items(detector_id)
            .into_iter()
            .map(|p| {
                let s = self.score(detector_id, p.value)?;
                Ok((p, s))
            })
            .collect()
    }

    /// Mark an anomaly resolved. Returns false when it is unknown or was
    /// already resolved; resolution is one-way.
    pub fn resolve_anomaly(&self, anomaly_id: &str, resolution: &str, resolved_by: &str) -> bool {
        let detector_id = match self.anomaly_index.get(anomaly_id) {
            Some(d) => d.clone(),
            None => return false,
        };
        let mut list = match self.anomalies.get_mut(&detector_id) {
            Some(l) => l,
            None => return false,
        };
        match list.iter_mut().find(|a| a.id == anomaly_id) {
            Some(a) if !a.is_resolved => {
                a.is_resolved = true;
                a.resolution = Some(resolution.to_string());
                a.resolved_by = Some(resolved_by.to_string());
                a.resolved_at = Some(self.clock.now());
                tracing::info!(anomaly_id, resolved_by, "Anomaly resolved");
                true
            }
            _ => false,
        }
    }

    pub fn get_anomaly(&self, anomaly_id: &str) -> EngineResult<Anomaly> {
        let detector_id = self.anomaly_index
            .get(anomaly_id)
            .map(|d| d.clone())
            .ok_or_else(|| EngineError::not_found("anomaly", anomaly_id))?;
        self.anomalies
            .get(&detector_id)
            .and_then(|l| l.iter().find(|a| a.id == anomaly_id).cloned())
            .ok_or_else(|| EngineError::not_found("anomaly", anomaly_id))
    }

    /// Anomalies detected within `range`, in detection order.
    /// Works for deleted detectors as long as they raised anomalies.
    pub fn get_anomalies(&self, detector_id: &str, range: &TimeRange) -> EngineResult<Vec<Anomaly>> {
        match self.anomalies.get(detector_id) {
            Some(list) => Ok(list.iter().filter(|a| range.contains(a.detected_at)).cloned().collect()),
            None if self.detectors.contains_key(detector_id) => Ok(Vec::new()),
            None => Err(EngineError::not_found("detector", detector_id)),
        }
    }

    pub fn anomaly_summary(&self, detector_id: &str, range: &TimeRange) -> EngineResult<AnomalySummary> {
        let anomalies = self.get_anomalies(detector_id, range)?;
        let scores: Vec<f64> = anomalies.iter().map(|a| a.score).collect();
        let count = |s: AnomalySeverity| anomalies.iter().filter(|a| a.severity == s).count();
        let resolved = anomalies.iter().filter(|a| a.is_resolved).count();

        Ok(AnomalySummary {
            detector_id: detector_id.to_string(),
            total: anomalies.len(),
            unresolved: anomalies.len() - resolved,
            resolved,
            low: count(AnomalySeverity::Low),
            medium: count(AnomalySeverity::Medium),
            high: count(AnomalySeverity::High),
            average_score: mean(&scores),
            max_score: scores.iter().copied().fold(0.0, f64::max),
            first_detected: anomalies.iter().map(|a| a.detected_at).min(),
            last_detected: anomalies.iter().map(|a| a.detected_at).max(),
        })
    }

    /// Classify the anomalies detected within `range`.
    ///
    /// Classification uses the anomalous points' own timestamps in detection
    /// order. Fewer than three anomalies is indeterminate.
    pub fn detect_pattern(&self, detector_id: &str, range: &TimeRange) -> EngineResult<Option<AnomalyPattern>> {
        let anomalies = self.get_anomalies(detector_id, range)?;
        if anomalies.len() < MIN_PATTERN_ANOMALIES {
            return Ok(None);
        }

        let in_order: Vec<_> = anomalies.iter().map(|a| a.data_point.timestamp).collect();
        let pattern_type = pattern::classify(
            &in_order,
            Duration::minutes(BURST_SPAN_MINUTES),
            BURST_MIN_COUNT,
        );

        let mut sorted = in_order.clone();
        sorted.sort();
        let severities: Vec<AnomalySeverity> = anomalies.iter().map(|a| a.severity).collect();
        let (dominant_severity, severity_consistency) = match pattern::dominant(&severities) {
            Some(d) => d,
            None => return Ok(None),
        };
        let confidence = (temporal_consistency(&sorted) + severity_consistency) / 2.0;

        let (first_seen, last_seen) = match (sorted.first(), sorted.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return Ok(None),
        };

        Ok(Some(AnomalyPattern {
            id: Uuid::new_v4().to_string(),
            detector_id: detector_id.to_string(),
            pattern_type,
            anomaly_ids: anomalies.iter().map(|a| a.id.clone()).collect(),
            count: anomalies.len(),
            first_seen,
            last_seen,
            dominant_severity,
            confidence,
            detected_at: self.clock.now(),
        }))
    }

    pub fn detector_ids(&self) -> Vec<String> {
        self.detectors.iter().map(|d| d.key().clone()).collect()
    }

    /// Detector ids fed by a data source
    pub fn detectors_for_source(&self, data_source: &str) -> Vec<String> {
        self.detectors
            .iter()
            .filter(|d| d.data_source == data_source)
            .map(|d| d.key().clone())
            .collect()
    }

    pub fn prune(&self) -> usize {
        self.windows.prune_all(self.clock.now())
    }
}

fn validate_sensitivity(sensitivity: f64) -> EngineResult<()> {
    if (0.0..=1.0).contains(&sensitivity) {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(format!(
            "sensitivity must be within [0, 1], got {}",
            sensitivity
        )))
    }
}

/// `training` minus one occurrence of `value`, if present
fn hold_out(training: &[f64], value: f64) -> Vec<f64> {
    let mut reference = training.to_vec();
    if let Some(pos) = reference.iter().position(|v| *v == value) {
        reference.remove(pos);
    }
    reference
}

fn leave_one_out_accuracy(strategy: &dyn ScoringStrategy, values: &[f64], rng: &mut dyn RngCore) -> f64 {
    if values.len() < MIN_ACCURACY_SAMPLES {
        return 0.5;
    }
    let agreements = (0..values.len())
        .filter(|&i| {
            let rest: Vec<f64> = values
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, v)| *v)
                .collect();
            let held_out = values[i];
            let truth = (held_out - mean(&rest)).abs() > 2.0 * std_dev(&rest);
            let predicted = strategy.score(held_out, &rest, rng) > 0.5;
            truth == predicted
        })
        .count();
    agreements as f64 / values.len() as f64
}
