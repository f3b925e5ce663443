pub mod analysis;
pub mod types;

use chrono::Duration;
use dashmap::DashMap;
use smallvec::{smallvec, SmallVec};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::TrendConfig;
use crate::error::{EngineError, EngineResult};
use crate::stats::mean;
use crate::types::{Alert, AlertKind, DataPoint, Label, Severity, TimeRange};
use crate::window::WindowStore;

pub use types::{
    AnalyzerOptions, AnalyzerUpdate, TrendAnalyzer, TrendDirection, TrendResult, TrendSummary,
    TrendType,
};

/// Owns every trend analyzer, its data window and its result history.
///
/// Each ingested point triggers a synchronous re-analysis of that analyzer's
/// window.
pub struct TrendAnalyzerService {
    config: TrendConfig,
    clock: SharedClock,
    instance: String,
    analyzers: DashMap<String, TrendAnalyzer>,
    windows: WindowStore<DataPoint>,
    history: WindowStore<TrendResult>,
}

impl TrendAnalyzerService {
    pub fn new(config: &TrendConfig, clock: SharedClock, instance: impl Into<String>) -> Self {
        Self {
            windows: WindowStore::new(Duration::minutes(config.window_minutes as i64), 0),
            history: WindowStore::new(
                Duration::hours(config.history_hours as i64),
                config.history_capacity,
            ),
            config: config.clone(),
            clock,
            instance: instance.into(),
            analyzers: DashMap::new(),
        }
    }

    pub fn create_analyzer(
        &self,
        name: &str,
        data_source: &str,
        metric: &str,
        options: Option<AnalyzerOptions>,
    ) -> EngineResult<String> {
        let options = options.unwrap_or_else(|| AnalyzerOptions::from(&self.config));
        if options.window_minutes == 0 {
            return Err(EngineError::InvalidArgument("window_minutes must be positive".into()));
        }

        let analyzer = TrendAnalyzer {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            data_source: data_source.to_string(),
            metric: metric.to_string(),
            options,
            is_active: true,
            created_at: self.clock.now(),
        };
        let id = analyzer.id.clone();
        self.windows.configure(&id, Duration::minutes(analyzer.options.window_minutes as i64));
        tracing::info!(analyzer_id = %id, name, data_source, metric, "Created trend analyzer");
        self.analyzers.insert(id.clone(), analyzer);
        Ok(id)
    }

    pub fn get_analyzer(&self, id: &str) -> EngineResult<TrendAnalyzer> {
        self.analyzers
            .get(id)
            .map(|a| a.clone())
            .ok_or_else(|| EngineError::not_found("analyzer", id))
    }

    pub fn list_analyzers(&self) -> Vec<TrendAnalyzer> {
        let mut all: Vec<TrendAnalyzer> = self.analyzers.iter().map(|a| a.clone()).collect();
        all.sort_by_key(|a| a.created_at);
        all
    }

    pub fn update_analyzer(&self, id: &str, update: AnalyzerUpdate) -> EngineResult<TrendAnalyzer> {
        if update.window_minutes == Some(0) {
            return Err(EngineError::InvalidArgument("window_minutes must be positive".into()));
        }
        let mut analyzer = self.analyzers
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("analyzer", id))?;

        if let Some(name) = update.name {
            analyzer.name = name;
        }
        if let Some(active) = update.is_active {
            analyzer.is_active = active;
        }
        if let Some(window) = update.window_minutes {
            analyzer.options.window_minutes = window;
            self.windows.configure(id, Duration::minutes(window as i64));
            self.windows.prune(id, self.clock.now());
        }
        Ok(analyzer.clone())
    }

    /// Remove an analyzer together with its window and history
    pub fn delete_analyzer(&self, id: &str) -> EngineResult<()> {
        self.analyzers
            .remove(id)
            .ok_or_else(|| EngineError::not_found("analyzer", id))?;
        self.windows.remove(id);
        self.history.remove(id);
        tracing::info!(analyzer_id = %id, "Deleted trend analyzer");
        Ok(())
    }

    /// Append a point and re-analyze the window
    pub fn add_data_point(&self, id: &str, point: DataPoint) -> EngineResult<Option<TrendResult>> {
        let analyzer = self.get_analyzer(id)?;
        if !analyzer.is_active {
            return Err(EngineError::Inactive { kind: "analyzer", id: id.to_string() });
        }
        self.windows.add(id, point, self.clock.now());
        self.analyze_trend(id)
    }

    /// Analyze the current window and record the result in the history
    pub fn analyze_trend(&self, id: &str) -> EngineResult<Option<TrendResult>> {
        let result = self.compute(id)?;
        if let Some(ref r) = result {
            tracing::debug!(
                analyzer_id = %id,
                direction = %r.direction,
                strength = r.strength,
                confidence = r.confidence,
                "Trend analyzed"
            );
            self.history.add(id, r.clone(), self.clock.now());
        }
        Ok(result)
    }

    fn compute(&self, id: &str) -> EngineResult<Option<TrendResult>> {
        let analyzer = self.get_analyzer(id)?;
        let now = self.clock.now();
        self.windows.prune(id, now);
        Ok(analysis::analyze(id, self.windows.items(id), &analyzer.options, now))
    }

    /// Alerts for a strong trend or an unreliable fit in the current window
    pub fn check_alerts(&self, id: &str) -> EngineResult<Vec<Alert>> {
        let analyzer = self.get_analyzer(id)?;
        let result = match self.compute(id)? {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };

        let labels: SmallVec<[Label; 4]> = smallvec![
            Label { key: "data_source".into(), value: analyzer.data_source.clone() },
            Label { key: "metric".into(), value: analyzer.metric.clone() },
        ];
        let mut alerts = Vec::new();

        if result.strength > self.config.high_strength_alert {
            alerts.push(Alert {
                timestamp: result.analyzed_at,
                severity: Severity::Warn,
                kind: AlertKind::HighTrend,
                subject: id.to_string(),
                value: result.strength,
                threshold: Some(self.config.high_strength_alert),
                message: format!(
                    "{} {} on {}: strength={:.2} (slope={:.4}/step, R²={:.2})",
                    analyzer.metric, result.trend_type, analyzer.data_source,
                    result.strength, result.slope, result.r2
                ),
                labels: labels.clone(),
                instance: self.instance.clone(),
            });
        }

        if result.confidence < self.config.low_confidence_alert {
            alerts.push(Alert {
                timestamp: result.analyzed_at,
                severity: Severity::Info,
                kind: AlertKind::LowConfidence,
                subject: id.to_string(),
                value: result.confidence,
                threshold: Some(self.config.low_confidence_alert),
                message: format!(
                    "{} trend on {} is unreliable: confidence={:.2} over {} points",
                    analyzer.metric, analyzer.data_source,
                    result.confidence, result.data_points.len()
                ),
                labels,
                instance: self.instance.clone(),
            });
        }

        Ok(alerts)
    }

    pub fn get_trends(&self, id: &str, range: &TimeRange) -> EngineResult<Vec<TrendResult>> {
        self.get_analyzer(id)?;
        Ok(self.history.items_between(id, range))
    }

    pub fn latest_trend(&self, id: &str) -> EngineResult<Option<TrendResult>> {
        self.get_analyzer(id)?;
        Ok(self.history.latest(id))
    }

    pub fn trend_summary(&self, id: &str, range: &TimeRange) -> EngineResult<TrendSummary> {
        let results = self.get_trends(id, range)?;
        let strengths: Vec<f64> = results.iter().map(|r| r.strength).collect();
        let confidences: Vec<f64> = results.iter().map(|r| r.confidence).collect();
        let latest = results.iter().max_by_key(|r| r.analyzed_at);

        Ok(TrendSummary {
            analyzer_id: id.to_string(),
            analyses: results.len(),
            significant: results.iter().filter(|r| r.is_significant).count(),
            average_strength: mean(&strengths),
            average_confidence: mean(&confidences),
            latest_direction: latest.map(|r| r.direction),
            latest_type: latest.map(|r| r.trend_type),
        })
    }

    /// Points currently inside an analyzer's window
    pub fn window_points(&self, id: &str) -> EngineResult<Vec<DataPoint>> {
        self.get_analyzer(id)?;
        Ok(self.windows.items(id))
    }

    pub fn analyzer_ids(&self) -> Vec<String> {
        self.analyzers.iter().map(|a| a.key().clone()).collect()
    }

    /// Prune every data window and result history. Returns items removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        self.windows.prune_all(now) + self.history.prune_all(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn service() -> (TrendAnalyzerService, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        let svc = TrendAnalyzerService::new(&TrendConfig::default(), Arc::new(clock.clone()), "test");
        (svc, clock)
    }

    fn feed(svc: &TrendAnalyzerService, clock: &ManualClock, id: &str, values: &[f64]) -> Option<TrendResult> {
        let mut last = None;
        for v in values {
            last = svc.add_data_point(id, DataPoint::new(*v, clock.now())).unwrap();
            clock.advance(Duration::minutes(5));
        }
        last
    }

    #[test]
    fn unknown_analyzer_is_not_found() {
        let (svc, clock) = service();
        let err = svc.add_data_point("missing", DataPoint::new(1.0, clock.now())).unwrap_err();
        assert!(err.is_not_found());
        assert!(svc.analyze_trend("missing").unwrap_err().is_not_found());
        assert!(svc.check_alerts("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn rejected_update_leaves_analyzer_unchanged() {
        let (svc, _clock) = service();
        let id = svc.create_analyzer("requests", "intake-api", "rpm", None).unwrap();
        let update = AnalyzerUpdate {
            name: Some("changed".into()),
            is_active: Some(false),
            window_minutes: Some(0),
        };
        assert!(matches!(svc.update_analyzer(&id, update), Err(EngineError::InvalidArgument(_))));

        let analyzer = svc.get_analyzer(&id).unwrap();
        assert_eq!(analyzer.name, "requests");
        assert!(analyzer.is_active);
        assert_eq!(analyzer.options.window_minutes, 60);
    }

    #[test]
    fn concurrent_points_on_one_analyzer_are_kept() {
        let (svc, clock) = service();
        let id = svc.create_analyzer("requests", "intake-api", "rpm", None).unwrap();
        let now = clock.now();

        std::thread::scope(|scope| {
            for t in 0..4 {
                let (svc, id) = (&svc, &id);
                scope.spawn(move || {
                    for i in 0..50 {
                        svc.add_data_point(id, DataPoint::new((t * 50 + i) as f64, now)).unwrap();
                    }
                });
            }
        });

        assert_eq!(svc.window_points(&id).unwrap().len(), 200);
    }

    #[test]
    fn analysis_starts_at_three_points() {
        let (svc, clock) = service();
        let id = svc.create_analyzer("requests", "intake-api", "rpm", None).unwrap();
        assert!(feed(&svc, &clock, &id, &[1.0, 2.0]).is_none());
        assert!(svc.check_alerts(&id).unwrap().is_empty());
        assert!(feed(&svc, &clock, &id, &[3.0]).is_some());
    }

    #[test]
    fn analyze_trend_is_idempotent() {
        let (svc, clock) = service();
        let id = svc.create_analyzer("latency", "dispatch", "p95_ms", None).unwrap();
        feed(&svc, &clock, &id, &[5.0, 9.0, 4.0, 12.0, 8.0]);

        let a = svc.analyze_trend(&id).unwrap().unwrap();
        let b = svc.analyze_trend(&id).unwrap().unwrap();
        assert_eq!(a.slope, b.slope);
        assert_eq!(a.intercept, b.intercept);
        assert_eq!(a.direction, b.direction);
    }

    #[test]
    fn stale_points_leave_the_window() {
        let (svc, clock) = service();
        let id = svc.create_analyzer("requests", "intake-api", "rpm", None).unwrap();
        feed(&svc, &clock, &id, &[1.0, 2.0, 3.0]);
        assert_eq!(svc.window_points(&id).unwrap().len(), 3);

        clock.advance(Duration::minutes(61));
        assert!(svc.analyze_trend(&id).unwrap().is_none());
        assert!(svc.window_points(&id).unwrap().is_empty());
    }

    #[test]
    fn strong_trend_raises_alert() {
        let (svc, clock) = service();
        let id = svc.create_analyzer("requests", "intake-api", "rpm", None).unwrap();
        feed(&svc, &clock, &id, &[10.0, 12.0, 14.0, 16.0, 18.0]);

        let alerts = svc.check_alerts(&id).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::HighTrend);
        assert_eq!(alerts[0].subject, id);
        assert_eq!(alerts[0].instance, "test");
    }

    #[test]
    fn noisy_series_raises_low_confidence_alert() {
        let (svc, clock) = service();
        let id = svc.create_analyzer("sensor", "river-gauge", "level", None).unwrap();
        feed(&svc, &clock, &id, &[1.0, 40.0, 2.0, 35.0, 1.0, 38.0]);

        let alerts = svc.check_alerts(&id).unwrap();
        assert!(alerts.iter().any(|a| a.kind == AlertKind::LowConfidence));
    }

    #[test]
    fn history_is_queryable_by_range() {
        let (svc, clock) = service();
        let start = clock.now();
        let id = svc.create_analyzer("requests", "intake-api", "rpm", None).unwrap();
        feed(&svc, &clock, &id, &[1.0, 2.0, 3.0, 4.0]);

        let all = svc.get_trends(&id, &TimeRange::new(start, clock.now())).unwrap();
        assert_eq!(all.len(), 2);
        let summary = svc.trend_summary(&id, &TimeRange::new(start, clock.now())).unwrap();
        assert_eq!(summary.analyses, 2);
        assert_eq!(summary.latest_direction, Some(TrendDirection::Increasing));
        assert!(svc.latest_trend(&id).unwrap().is_some());
    }

    #[test]
    fn inactive_analyzer_rejects_points_and_delete_clears_state() {
        let (svc, clock) = service();
        let id = svc.create_analyzer("requests", "intake-api", "rpm", None).unwrap();
        svc.update_analyzer(&id, AnalyzerUpdate { is_active: Some(false), ..Default::default() }).unwrap();

        let err = svc.add_data_point(&id, DataPoint::new(1.0, clock.now())).unwrap_err();
        assert!(matches!(err, EngineError::Inactive { .. }));

        svc.delete_analyzer(&id).unwrap();
        assert!(svc.get_analyzer(&id).unwrap_err().is_not_found());
        assert!(svc.list_analyzers().is_empty());
    }

    #[test]
    fn shrinking_window_prunes_immediately() {
        let (svc, clock) = service();
        let id = svc.create_analyzer("requests", "intake-api", "rpm", None).unwrap();
        feed(&svc, &clock, &id, &[1.0, 2.0, 3.0, 4.0]);

        let updated = svc
            .update_analyzer(&id, AnalyzerUpdate { window_minutes: Some(10), ..Default::default() })
            .unwrap();
        assert_eq!(updated.options.window_minutes, 10);
        assert_eq!(svc.window_points(&id).unwrap().len(), 2);
    }
}
