use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::config::TrendConfig;
use crate::types::DataPoint;
use crate::window::Timestamped;

/// A registered trend analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalyzer {
    pub id: String,
    pub name: String,
    pub data_source: String,
    pub metric: String,
    pub options: AnalyzerOptions,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-analyzer tuning, defaulted from `[trend]` config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerOptions {
    pub window_minutes: u64,
    pub min_points: usize,
    pub forecast_steps: usize,
    pub forecast_interval_minutes: u64,
}

impl From<&TrendConfig> for AnalyzerOptions {
    fn from(config: &TrendConfig) -> Self {
        Self {
            window_minutes: config.window_minutes,
            min_points: config.min_points,
            forecast_steps: config.forecast_steps,
            forecast_interval_minutes: config.forecast_interval_minutes,
        }
    }
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self::from(&TrendConfig::default())
    }
}

/// Partial update for an analyzer; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct AnalyzerUpdate {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub window_minutes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Increasing => write!(f, "INCREASING"),
            TrendDirection::Decreasing => write!(f, "DECREASING"),
            TrendDirection::Stable => write!(f, "STABLE"),
        }
    }
}

/// Strength bucket qualified by direction, e.g. `STRONG_INCREASING`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrendType {
    Random,
    Weak(TrendDirection),
    Moderate(TrendDirection),
    Strong(TrendDirection),
}

impl TrendType {
    pub fn classify(strength: f64, direction: TrendDirection) -> Self {
        if strength < 0.3 {
            TrendType::Random
        } else if strength < 0.5 {
            TrendType::Weak(direction)
        } else if strength < 0.7 {
            TrendType::Moderate(direction)
        } else {
            TrendType::Strong(direction)
        }
    }
}

impl std::fmt::Display for TrendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendType::Random => write!(f, "RANDOM"),
            TrendType::Weak(d) => write!(f, "WEAK_{}", d),
            TrendType::Moderate(d) => write!(f, "MODERATE_{}", d),
            TrendType::Strong(d) => write!(f, "STRONG_{}", d),
        }
    }
}

impl Serialize for TrendType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Snapshot produced by one analysis run. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct TrendResult {
    pub id: String,
    pub analyzer_id: String,
    pub analyzed_at: DateTime<Utc>,
    pub data_points: Vec<DataPoint>,
    pub direction: TrendDirection,
    pub strength: f64,
    pub confidence: f64,
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    pub is_significant: bool,
    pub trend_type: TrendType,
    pub forecast: Vec<DataPoint>,
    pub anomalies: Vec<DataPoint>,
}

impl Timestamped for TrendResult {
    fn timestamp(&self) -> DateTime<Utc> {
        self.analyzed_at
    }
}

/// Aggregate over the retained results of one analyzer
#[derive(Debug, Clone, Serialize)]
pub struct TrendSummary {
    pub analyzer_id: String,
    pub analyses: usize,
    pub significant: usize,
    pub average_strength: f64,
    pub average_confidence: f64,
    pub latest_direction: Option<TrendDirection>,
    pub latest_type: Option<TrendType>,
}
