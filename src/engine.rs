//! The analytics engine: one handle over the trend, anomaly and correlation
//! services, sharing a clock.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use smallvec::{smallvec, SmallVec};

use crate::anomaly::{
    Anomaly, AnomalyDetectorService, AnomalyPattern, AnomalySeverity, AnomalySummary,
    DetectionModel, ScoringPool,
};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::correlation::{CorrelationResult, EventCorrelator, EventPattern};
use crate::error::EngineResult;
use crate::trend::{TrendAnalyzerService, TrendResult};
use crate::types::{Alert, AlertKind, DataPoint, Event, Label, Severity, TimeRange};

pub struct AnalyticsEngine {
    trends: Arc<TrendAnalyzerService>,
    anomalies: Arc<AnomalyDetectorService>,
    correlator: Arc<EventCorrelator>,
    pool: Option<ScoringPool>,
    clock: SharedClock,
    instance: String,
}

impl AnalyticsEngine {
    pub fn new(config: &Config, clock: SharedClock) -> Self {
        let instance = config.engine.instance.clone();
        let trends = Arc::new(TrendAnalyzerService::new(&config.trend, clock.clone(), instance.clone()));
        let anomalies = Arc::new(AnomalyDetectorService::new(&config.anomaly, clock.clone()));
        let correlator = Arc::new(EventCorrelator::new(&config.correlation, clock.clone()));
        let pool = match config.anomaly.scoring_pool_size {
            0 => None,
            size => Some(ScoringPool::new(Arc::clone(&anomalies), size)),
        };

        tracing::info!(
            instance = %instance,
            scoring_pool = config.anomaly.scoring_pool_size,
            "Initialized analytics engine"
        );

        Self { trends, anomalies, correlator, pool, clock, instance }
    }

    /// Engine driven by wall-clock time
    pub fn with_system_clock(config: &Config) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn trends(&self) -> &Arc<TrendAnalyzerService> {
        &self.trends
    }

    pub fn anomalies(&self) -> &Arc<AnomalyDetectorService> {
        &self.anomalies
    }

    pub fn correlator(&self) -> &Arc<EventCorrelator> {
        &self.correlator
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Ingestion ───────────────────────────────────────────────────────

    pub fn add_data_point(
        &self,
        analyzer_id: &str,
        value: f64,
        timestamp: DateTime<Utc>,
        metadata: BTreeMap<String, String>,
    ) -> EngineResult<Option<TrendResult>> {
        let point = DataPoint::new(value, timestamp).with_metadata(metadata);
        self.trends.add_data_point(analyzer_id, point)
    }

    pub fn process_event(&self, event: Event) -> EngineResult<Vec<CorrelationResult>> {
        self.correlator.process_event(event)
    }

    pub fn train_detector(&self, detector_id: &str, training: Vec<DataPoint>) -> EngineResult<DetectionModel> {
        self.anomalies.train_model(detector_id, training, Default::default())
    }

    /// Run detection, on the blocking pool when one is configured
    pub async fn detect_anomaly(&self, detector_id: &str, point: DataPoint) -> EngineResult<Option<Anomaly>> {
        match &self.pool {
            Some(pool) => pool.detect(detector_id, point).await,
            None => self.anomalies.detect_anomaly(detector_id, point),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn get_trends(&self, analyzer_id: &str, range: &TimeRange) -> EngineResult<Vec<TrendResult>> {
        self.trends.get_trends(analyzer_id, range)
    }

    pub fn get_anomalies(&self, detector_id: &str, range: &TimeRange) -> EngineResult<Vec<Anomaly>> {
        self.anomalies.get_anomalies(detector_id, range)
    }

    pub fn get_anomaly_summary(&self, detector_id: &str, range: &TimeRange) -> EngineResult<AnomalySummary> {
        self.anomalies.anomaly_summary(detector_id, range)
    }

    pub fn find_correlations(&self, source: &str, range: &TimeRange) -> Vec<CorrelationResult> {
        self.correlator.find_correlations(source, range)
    }

    pub fn detect_anomaly_pattern(&self, detector_id: &str, range: &TimeRange) -> EngineResult<Option<AnomalyPattern>> {
        self.anomalies.detect_pattern(detector_id, range)
    }

    pub fn detect_event_pattern(&self, source: &str, event_type: &str, range: &TimeRange) -> Option<EventPattern> {
        self.correlator.detect_pattern(source, event_type, range)
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// Prune every window and expired result. Returns the number of items dropped.
    pub fn prune_all(&self) -> usize {
        let pruned = self.trends.prune() + self.anomalies.prune() + self.correlator.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired items");
        }
        pruned
    }

    /// Trend alerts of every active analyzer
    pub fn trend_alerts(&self) -> Vec<Alert> {
        self.trends
            .list_analyzers()
            .into_iter()
            .filter(|a| a.is_active)
            .flat_map(|a| match self.trends.check_alerts(&a.id) {
                Ok(alerts) => alerts,
                Err(e) => {
                    tracing::warn!(analyzer_id = %a.id, error = %e, "Trend alert check failed");
                    Vec::new()
                }
            })
            .collect()
    }

    pub fn anomaly_alert(&self, anomaly: &Anomaly) -> Alert {
        let severity = match anomaly.severity {
            AnomalySeverity::High => Severity::Critical,
            AnomalySeverity::Medium => Severity::Warn,
            AnomalySeverity::Low => Severity::Info,
        };
        let (name, data_source) = match self.anomalies.get_detector(&anomaly.detector_id) {
            Ok(d) => (d.name, d.data_source),
            Err(_) => (anomaly.detector_id.clone(), String::new()),
        };
        let labels: SmallVec<[Label; 4]> = smallvec![
            Label { key: "data_source".into(), value: data_source },
            Label { key: "severity".into(), value: anomaly.severity.to_string() },
        ];

        Alert {
            timestamp: anomaly.detected_at,
            severity,
            kind: AlertKind::Anomaly,
            subject: anomaly.detector_id.clone(),
            value: anomaly.data_point.value,
            threshold: None,
            message: format!(
                "{} anomaly on {}: value={:.2} score={:.2}",
                anomaly.severity, name, anomaly.data_point.value, anomaly.score
            ),
            labels,
            instance: self.instance.clone(),
        }
    }

    /// Alert for a significant correlation; `None` otherwise.
    /// Severity is the highest event severity, at least WARN.
    pub fn correlation_alert(&self, result: &CorrelationResult) -> Option<Alert> {
        if !result.is_significant {
            return None;
        }
        let severity = result
            .events
            .iter()
            .map(|e| e.severity)
            .max()
            .unwrap_or(Severity::Warn)
            .max(Severity::Warn);
        let (name, action) = match self.correlator.get_rule(&result.rule_id) {
            Ok(rule) => (rule.name, rule.action),
            Err(_) => (result.rule_id.clone(), String::new()),
        };

        let mut labels: SmallVec<[Label; 4]> = smallvec![
            Label { key: "rule".into(), value: name.clone() },
        ];
        if !action.is_empty() {
            labels.push(Label { key: "action".into(), value: action });
        }

        Some(Alert {
            timestamp: result.correlated_at,
            severity,
            kind: AlertKind::Correlation,
            subject: result.rule_id.clone(),
            value: result.correlation_score,
            threshold: None,
            message: format!(
                "{} correlated {} events (score={:.2})",
                name,
                result.events.len(),
                result.correlation_score
            ),
            labels,
            instance: self.instance.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::DetectionType;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn engine() -> (AnalyticsEngine, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap());
        let mut config = Config::default();
        config.engine.instance = "test-node".into();
        config.anomaly.seed = Some(5);
        (AnalyticsEngine::new(&config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn ingestion_reaches_trend_service() {
        let (engine, clock) = engine();
        let id = engine.trends().create_analyzer("requests", "intake", "rpm", None).unwrap();
        let start = clock.now();
        for v in [10.0, 20.0, 30.0] {
            engine.add_data_point(&id, v, clock.now(), BTreeMap::new()).unwrap();
            clock.advance(Duration::minutes(1));
        }
        let trends = engine.get_trends(&id, &TimeRange::new(start, clock.now())).unwrap();
        assert_eq!(trends.len(), 1);
        assert!(engine.add_data_point("missing", 1.0, clock.now(), BTreeMap::new()).is_err());
    }

    #[tokio::test]
    async fn anomaly_alert_maps_severity() {
        let (engine, clock) = engine();
        let id = engine.anomalies()
            .create_detector("latency", "dispatch", DetectionType::Statistical, None)
            .unwrap();
        let training = [5.0, 5.5, 4.5, 5.0, 5.2].iter().map(|v| DataPoint::new(*v, clock.now())).collect();
        engine.train_detector(&id, training).unwrap();

        let anomaly = engine.detect_anomaly(&id, DataPoint::new(50.0, clock.now())).await.unwrap().unwrap();
        let alert = engine.anomaly_alert(&anomaly);
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.kind, AlertKind::Anomaly);
        assert_eq!(alert.instance, "test-node");
        assert!(alert.message.contains("latency"));
    }

    #[test]
    fn only_significant_correlations_alert() {
        let (engine, clock) = engine();
        engine.correlator().create_rule("pair", "", Default::default(), "page").unwrap();
        let event = |sev| Event::new("radio", "sos", clock.now()).with_field("zone", json!("c")).with_severity(sev);
        engine.process_event(event(Severity::Info)).unwrap();
        let results = engine.process_event(event(Severity::Emergency)).unwrap();
        assert_eq!(results.len(), 1);

        let alert = engine.correlation_alert(&results[0]).unwrap();
        assert_eq!(alert.severity, Severity::Emergency);
        assert!(alert.labels.iter().any(|l| l.key == "action" && l.value == "page"));

        let mut weak = results[0].clone();
        weak.is_significant = false;
        assert!(engine.correlation_alert(&weak).is_none());
    }

    #[test]
    fn prune_all_clears_expired_state() {
        let (engine, clock) = engine();
        let id = engine.trends().create_analyzer("beds", "shelter", "free", None).unwrap();
        engine.add_data_point(&id, 3.0, clock.now(), BTreeMap::new()).unwrap();
        engine.process_event(Event::new("shelter", "checkin", clock.now())).unwrap();
        clock.advance(Duration::hours(48));
        assert!(engine.prune_all() >= 2);
        assert!(engine.trends().window_points(&id).unwrap().is_empty());
    }
}
