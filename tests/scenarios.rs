//! End-to-end scenarios through the engine facade.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use relief_analytics::anomaly::{AnomalySeverity, DetectionType};
use relief_analytics::clock::ManualClock;
use relief_analytics::config::Config;
use relief_analytics::correlation::Conditions;
use relief_analytics::trend::{TrendDirection, TrendType};
use relief_analytics::types::{DataPoint, Event, PatternType, TimeRange};
use relief_analytics::AnalyticsEngine;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 15, 9, 0, 0).unwrap()
}

fn engine() -> (AnalyticsEngine, ManualClock) {
    let clock = ManualClock::new(t0());
    let mut config = Config::default();
    config.engine.instance = "scenario".into();
    config.anomaly.seed = Some(2024);
    (AnalyticsEngine::new(&config, Arc::new(clock.clone())), clock)
}

#[test]
fn linear_growth_is_a_strong_increasing_trend() {
    let (engine, clock) = engine();
    let id = engine.trends().create_analyzer("requests", "intake-api", "rpm", None).unwrap();

    let mut last = None;
    for v in [10.0, 12.0, 14.0, 16.0, 18.0] {
        last = engine.add_data_point(&id, v, clock.now(), BTreeMap::new()).unwrap();
        clock.advance(Duration::minutes(5));
    }
    let result = last.expect("five points produce a trend");

    assert_eq!(result.direction, TrendDirection::Increasing);
    assert!(result.strength > 0.5 && result.strength <= 1.0);
    assert_eq!(result.trend_type, TrendType::Strong(TrendDirection::Increasing));
    assert!((result.slope - 2.0).abs() < 1e-9);
    assert!((result.r2 - 1.0).abs() < 1e-9);

    let forecast: Vec<f64> = result.forecast.iter().map(|p| p.value).collect();
    assert_eq!(forecast.len(), 5);
    for (k, v) in forecast.iter().enumerate() {
        assert!((v - (20.0 + 2.0 * k as f64)).abs() < 1e-9, "step {} forecast {}", k + 1, v);
    }
    let last_ts = t0() + Duration::minutes(20);
    assert_eq!(result.forecast[0].timestamp, last_ts + Duration::minutes(5));
    assert!(result.forecast.iter().all(|p| p.is_forecast));

    // a perfect line has no embedded anomalies
    assert!(result.anomalies.is_empty());
}

#[test]
fn strong_trend_raises_high_trend_alert() {
    let (engine, clock) = engine();
    let id = engine.trends().create_analyzer("queue", "dispatch", "open_requests", None).unwrap();
    for v in [10.0, 12.0, 14.0, 16.0, 18.0] {
        engine.add_data_point(&id, v, clock.now(), BTreeMap::new()).unwrap();
        clock.advance(Duration::minutes(5));
    }
    let alerts = engine.trend_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].subject, id);
    assert_eq!(alerts[0].instance, "scenario");
}

#[tokio::test]
async fn statistical_detector_flags_isolated_spike_as_high() {
    let (engine, clock) = engine();
    let id = engine.anomalies()
        .create_detector("shelter load", "shelter-3", DetectionType::Statistical, None)
        .unwrap();
    let training: Vec<DataPoint> = [10.0, 10.0, 11.0, 9.0, 10.0, 50.0]
        .iter()
        .map(|v| DataPoint::new(*v, clock.now()))
        .collect();
    let model = engine.train_detector(&id, training).unwrap();
    assert!(model.is_ready);
    assert_eq!(model.accuracy, 0.5);

    let anomaly = engine
        .detect_anomaly(&id, DataPoint::new(50.0, clock.now()))
        .await
        .unwrap()
        .expect("50 is far outside the rest of the training data");
    assert_eq!(anomaly.severity, AnomalySeverity::High);
    assert!(anomaly.score > 0.8);

    let summary = engine
        .get_anomaly_summary(&id, &TimeRange::last_minutes(clock.now(), 5))
        .unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.high, 1);
}

#[test]
fn rule_conditions_and_field_overlap_drive_correlation() {
    let (engine, clock) = engine();
    let conditions: Conditions = json!({"X": 42}).as_object().cloned().unwrap();
    let rule = engine.correlator().create_rule("supply-42", "", conditions, "notify").unwrap();

    let without_x = Event::new("depot", "stock.low", clock.now()).with_field("item", "water");
    assert!(engine.process_event(without_x).unwrap().is_empty());

    // move past the look-back so the buffered event without X is not related
    clock.advance(Duration::minutes(31));
    let first = Event::new("depot", "stock.low", clock.now())
        .with_field("X", 42)
        .with_field("item", "water")
        .with_field("region", "east")
        .with_field("qty", 12);
    assert!(engine.process_event(first).unwrap().is_empty());

    clock.advance(Duration::minutes(10));
    let second = Event::new("depot", "stock.low", clock.now())
        .with_field("X", 42)
        .with_field("item", "water")
        .with_field("region", "east")
        .with_field("qty", 4);
    let results = engine.process_event(second).unwrap();

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.rule_id, rule);
    assert!(r.correlation_score > 0.7);
    assert!(r.is_significant);

    let found = engine.find_correlations("depot", &TimeRange::last_minutes(clock.now(), 60));
    assert_eq!(found.len(), 1);
    assert!(engine.correlation_alert(&found[0]).is_some());
}

#[tokio::test]
async fn six_anomalies_in_four_minutes_form_a_burst() {
    let (engine, clock) = engine();
    let start = clock.now();
    let id = engine.anomalies()
        .create_detector("latency", "dispatch", DetectionType::Statistical, Some(0.5))
        .unwrap();
    let training = [20.0, 21.0, 19.0, 20.0, 22.0, 18.0, 20.5, 19.5]
        .iter()
        .map(|v| DataPoint::new(*v, clock.now()))
        .collect();
    engine.train_detector(&id, training).unwrap();

    for i in 0..6 {
        let anomaly = engine
            .detect_anomaly(&id, DataPoint::new(100.0 + i as f64, clock.now()))
            .await
            .unwrap();
        assert!(anomaly.is_some());
        clock.advance(Duration::seconds(48));
    }

    let range = TimeRange::new(start, clock.now());
    let pattern = engine.detect_anomaly_pattern(&id, &range).unwrap().unwrap();
    assert_eq!(pattern.pattern_type, PatternType::Burst);
    assert_eq!(pattern.count, 6);
    assert!(pattern.last_seen - pattern.first_seen <= Duration::minutes(4));
    assert!((0.0..=1.0).contains(&pattern.confidence));
}

#[test]
fn event_burst_and_unknown_ids() {
    let (engine, clock) = engine();
    let start = clock.now();
    for _ in 0..6 {
        engine.process_event(Event::new("radio", "sos", clock.now()).with_field("zone", "a")).unwrap();
        clock.advance(Duration::seconds(20));
    }
    let pattern = engine
        .detect_event_pattern("radio", "sos", &TimeRange::new(start, clock.now()))
        .unwrap();
    assert_eq!(pattern.pattern_type, PatternType::Burst);

    let range = TimeRange::new(start, clock.now());
    assert!(engine.get_trends("nope", &range).unwrap_err().is_not_found());
    assert!(engine.get_anomalies("nope", &range).unwrap_err().is_not_found());
    assert!(engine.detect_anomaly_pattern("nope", &range).unwrap_err().is_not_found());
}
