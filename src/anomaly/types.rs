use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DataPoint, PatternType};

/// Scoring strategy of a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionType {
    Statistical,
    IsolationForest,
    OneClassSvm,
    DensityBased,
}

impl DetectionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "statistical" | "zscore" => Some(DetectionType::Statistical),
            "isolation_forest" => Some(DetectionType::IsolationForest),
            "one_class_svm" => Some(DetectionType::OneClassSvm),
            "density_based" | "density" => Some(DetectionType::DensityBased),
            _ => None,
        }
    }
}

impl std::fmt::Display for DetectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionType::Statistical => write!(f, "STATISTICAL"),
            DetectionType::IsolationForest => write!(f, "ISOLATION_FOREST"),
            DetectionType::OneClassSvm => write!(f, "ONE_CLASS_SVM"),
            DetectionType::DensityBased => write!(f, "DENSITY_BASED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
}

impl AnomalySeverity {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            AnomalySeverity::High
        } else if score >= 0.6 {
            AnomalySeverity::Medium
        } else {
            AnomalySeverity::Low
        }
    }
}

impl std::fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalySeverity::Low => write!(f, "LOW"),
            AnomalySeverity::Medium => write!(f, "MEDIUM"),
            AnomalySeverity::High => write!(f, "HIGH"),
        }
    }
}

/// A registered detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detector {
    pub id: String,
    pub name: String,
    pub data_source: String,
    pub detection_type: DetectionType,
    pub sensitivity: f64,
    pub window_minutes: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectorUpdate {
    pub name: Option<String>,
    pub sensitivity: Option<f64>,
    pub is_active: Option<bool>,
}

/// Trained model. Retraining replaces it wholesale.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionModel {
    pub id: String,
    pub detector_id: String,
    pub model_type: DetectionType,
    pub training_data: Vec<DataPoint>,
    pub trained_at: DateTime<Utc>,
    /// Leave-one-out agreement with a 2σ rule on the training data itself
    pub accuracy: f64,
    pub is_ready: bool,
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl DetectionModel {
    pub fn values(&self) -> Vec<f64> {
        self.training_data.iter().map(|p| p.value).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub id: String,
    pub detector_id: String,
    pub data_point: DataPoint,
    pub score: f64,
    pub severity: AnomalySeverity,
    pub detected_at: DateTime<Utc>,
    pub is_resolved: bool,
    pub resolution: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyPattern {
    pub id: String,
    pub detector_id: String,
    pub pattern_type: PatternType,
    pub anomaly_ids: Vec<String>,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub dominant_severity: AnomalySeverity,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnomalySummary {
    pub detector_id: String,
    pub total: usize,
    pub unresolved: usize,
    pub resolved: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub average_score: f64,
    pub max_score: f64,
    pub first_detected: Option<DateTime<Utc>>,
    pub last_detected: Option<DateTime<Utc>>,
}
