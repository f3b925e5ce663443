pub mod alerter;
pub mod anomaly;
pub mod clock;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod pattern;
pub mod scheduler;
pub mod source;
pub mod stats;
pub mod trend;
pub mod window;

pub use engine::AnalyticsEngine;
pub use error::{EngineError, EngineResult};

/// Common types used across modules
pub mod types {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use smallvec::SmallVec;
    use uuid::Uuid;

    /// A single numeric measurement fed into an analyzer or detector
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct DataPoint {
        pub id: String,
        pub value: f64,
        pub timestamp: DateTime<Utc>,
        #[serde(default)]
        pub metadata: BTreeMap<String, String>,
        #[serde(default)]
        pub is_forecast: bool,
        #[serde(default)]
        pub is_anomaly: bool,
    }

    impl DataPoint {
        pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
            Self {
                id: Uuid::new_v4().to_string(),
                value,
                timestamp,
                metadata: BTreeMap::new(),
                is_forecast: false,
                is_anomaly: false,
            }
        }

        pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
            self.metadata = metadata;
            self
        }
    }

    /// A discrete event published by some part of the relief system
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Event {
        pub id: String,
        pub source: String,
        pub event_type: String,
        #[serde(default)]
        pub data: serde_json::Map<String, serde_json::Value>,
        pub timestamp: DateTime<Utc>,
        #[serde(default = "default_event_severity")]
        pub severity: Severity,
        #[serde(default)]
        pub metadata: BTreeMap<String, String>,
    }

    impl Event {
        pub fn new(source: impl Into<String>, event_type: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
            Self {
                id: Uuid::new_v4().to_string(),
                source: source.into(),
                event_type: event_type.into(),
                data: serde_json::Map::new(),
                timestamp,
                severity: Severity::Info,
                metadata: BTreeMap::new(),
            }
        }

        pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
            self.data.insert(key.into(), value.into());
            self
        }

        pub fn with_severity(mut self, severity: Severity) -> Self {
            self.severity = severity;
            self
        }
    }

    fn default_event_severity() -> Severity {
        Severity::Info
    }

    /// A label key-value pair
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Label {
        pub key: String,
        pub value: String,
    }

    /// Alert and event severity levels
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        Info,
        Warn,
        Critical,
        Emergency,
    }

    impl Severity {
        pub fn parse(s: &str) -> Option<Self> {
            match s.to_ascii_lowercase().as_str() {
                "info" => Some(Severity::Info),
                "warn" | "warning" => Some(Severity::Warn),
                "critical" => Some(Severity::Critical),
                "emergency" => Some(Severity::Emergency),
                _ => None,
            }
        }
    }

    /// What raised an alert
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AlertKind {
        HighTrend,
        LowConfidence,
        Anomaly,
        Correlation,
    }

    /// An alert to be dispatched
    #[derive(Debug, Clone, Serialize)]
    pub struct Alert {
        pub timestamp: DateTime<Utc>,
        pub severity: Severity,
        pub kind: AlertKind,
        /// Analyzer, detector or rule id the alert is about
        pub subject: String,
        pub value: f64,
        pub threshold: Option<f64>,
        pub message: String,
        pub labels: SmallVec<[Label; 4]>,
        pub instance: String,
    }

    impl std::fmt::Display for Severity {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Severity::Info => write!(f, "INFO"),
                Severity::Warn => write!(f, "WARN"),
                Severity::Critical => write!(f, "CRITICAL"),
                Severity::Emergency => write!(f, "EMERGENCY"),
            }
        }
    }

    impl std::fmt::Display for AlertKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                AlertKind::HighTrend => "trend.high_strength",
                AlertKind::LowConfidence => "trend.low_confidence",
                AlertKind::Anomaly => "anomaly.detected",
                AlertKind::Correlation => "correlation.significant",
            };
            write!(f, "{}", s)
        }
    }

    /// Inclusive time range used by the query surface
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TimeRange {
        pub start: DateTime<Utc>,
        pub end: DateTime<Utc>,
    }

    impl TimeRange {
        pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
            Self { start, end }
        }

        /// Range covering the `minutes` before `end`
        pub fn last_minutes(end: DateTime<Utc>, minutes: i64) -> Self {
            Self { start: end - chrono::Duration::minutes(minutes), end }
        }

        pub fn contains(&self, ts: DateTime<Utc>) -> bool {
            ts >= self.start && ts <= self.end
        }
    }

    /// Classification shared by anomaly and event patterns
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum PatternType {
        Burst,
        Sequential,
        Random,
    }

    impl std::fmt::Display for PatternType {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                PatternType::Burst => write!(f, "BURST"),
                PatternType::Sequential => write!(f, "SEQUENTIAL"),
                PatternType::Random => write!(f, "RANDOM"),
            }
        }
    }
}
