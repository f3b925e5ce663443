use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::stats::{clamp01, linear_regression, mean, safe_div, std_dev};
use crate::types::DataPoint;
use super::types::{AnalyzerOptions, TrendDirection, TrendResult, TrendType};

/// Percent change between first and last value beyond which a series has a direction
const DIRECTION_THRESHOLD_PCT: f64 = 5.0;
const SIGNIFICANCE: f64 = 0.7;

/// Fit a line through `points` and derive the trend snapshot.
///
/// The regression x-axis is the position in timestamp order, not wall-clock
/// time. Returns `None` when fewer than `options.min_points` points are given.
pub fn analyze(
    analyzer_id: &str,
    mut points: Vec<DataPoint>,
    options: &AnalyzerOptions,
    now: DateTime<Utc>,
) -> Option<TrendResult> {
    if points.len() < options.min_points.max(3) {
        return None;
    }
    points.sort_by_key(|p| p.timestamp);

    let xs: Vec<f64> = (0..points.len()).map(|i| i as f64).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.value).collect();
    let (slope, intercept, r2) = linear_regression(&xs, &ys)?;
    let r2 = clamp01(r2);

    let direction = direction_of(ys[0], ys[ys.len() - 1]);
    let strength = (slope.abs() * r2).min(1.0);

    let m = mean(&ys);
    let sd = std_dev(&ys);
    let data_consistency = if m.abs() < f64::EPSILON {
        0.0
    } else {
        (1.0 - sd / m.abs()).max(0.0)
    };
    let confidence = clamp01((r2 + data_consistency) / 2.0);

    let mut anomalies = Vec::new();
    for p in points.iter_mut() {
        if (p.value - m).abs() > 2.0 * sd {
            p.is_anomaly = true;
            anomalies.push(p.clone());
        }
    }

    let last = points.last()?.timestamp;
    let forecast = forecast(slope, intercept, points.len(), last, options);

    Some(TrendResult {
        id: Uuid::new_v4().to_string(),
        analyzer_id: analyzer_id.to_string(),
        analyzed_at: now,
        data_points: points,
        direction,
        strength,
        confidence,
        slope,
        intercept,
        r2,
        is_significant: confidence > SIGNIFICANCE,
        trend_type: TrendType::classify(strength, direction),
        forecast,
        anomalies,
    })
}

fn direction_of(first: f64, last: f64) -> TrendDirection {
    let change_pct = safe_div(last - first, first.abs()) * 100.0;
    if change_pct > DIRECTION_THRESHOLD_PCT {
        TrendDirection::Increasing
    } else if change_pct < -DIRECTION_THRESHOLD_PCT {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

/// Extend the fitted line past the last observation at a fixed cadence
fn forecast(
    slope: f64,
    intercept: f64,
    observed: usize,
    last: DateTime<Utc>,
    options: &AnalyzerOptions,
) -> Vec<DataPoint> {
    let step = Duration::minutes(options.forecast_interval_minutes as i64);
    (1..=options.forecast_steps)
        .map(|k| {
            let x = (observed - 1 + k) as f64;
            let mut p = DataPoint::new(slope * x + intercept, last + step * k as i32);
            p.is_forecast = true;
            p.metadata.insert("forecast_step".into(), k.to_string());
            p
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series(values: &[f64]) -> (Vec<DataPoint>, DateTime<Utc>) {
        let t0 = Utc.with_ymd_and_hms(2024, 2, 10, 9, 0, 0).unwrap();
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| DataPoint::new(*v, t0 + Duration::minutes(5 * i as i64)))
            .collect::<Vec<_>>();
        let now = t0 + Duration::minutes(5 * values.len() as i64);
        (points, now)
    }

    #[test]
    fn fewer_than_three_points_is_indeterminate() {
        let (points, now) = series(&[1.0, 2.0]);
        assert!(analyze("a", points, &AnalyzerOptions::default(), now).is_none());
    }

    #[test]
    fn steady_increase_is_strong_and_forecast_continues_slope() {
        let (points, now) = series(&[10.0, 12.0, 14.0, 16.0, 18.0]);
        let result = analyze("a", points, &AnalyzerOptions::default(), now).unwrap();

        assert_eq!(result.direction, TrendDirection::Increasing);
        assert!((result.slope - 2.0).abs() < 1e-9);
        assert!((result.intercept - 10.0).abs() < 1e-9);
        assert!((result.r2 - 1.0).abs() < 1e-9);
        assert_eq!(result.strength, 1.0);
        assert_eq!(result.trend_type, TrendType::Strong(TrendDirection::Increasing));
        assert!(result.is_significant);

        let values: Vec<f64> = result.forecast.iter().map(|p| p.value).collect();
        for (got, want) in values.iter().zip([20.0, 22.0, 24.0, 26.0, 28.0]) {
            assert!((got - want).abs() < 1e-9);
        }
        assert!(result.forecast.iter().all(|p| p.is_forecast));
        let last = result.data_points.last().unwrap().timestamp;
        assert_eq!(result.forecast[0].timestamp, last + Duration::minutes(5));
        assert_eq!(result.forecast[4].timestamp, last + Duration::minutes(25));
    }

    #[test]
    fn points_are_sorted_by_timestamp_before_fitting() {
        let (mut points, now) = series(&[10.0, 12.0, 14.0, 16.0]);
        points.reverse();
        let result = analyze("a", points, &AnalyzerOptions::default(), now).unwrap();
        assert!(result.slope > 0.0);
        assert_eq!(result.direction, TrendDirection::Increasing);
    }

    #[test]
    fn flat_series_is_stable_random_and_guarded() {
        let (points, now) = series(&[7.0, 7.0, 7.0, 7.0]);
        let result = analyze("a", points, &AnalyzerOptions::default(), now).unwrap();
        assert_eq!(result.direction, TrendDirection::Stable);
        assert_eq!(result.r2, 0.0);
        assert_eq!(result.strength, 0.0);
        assert_eq!(result.trend_type, TrendType::Random);
        assert!(result.confidence.is_finite());
        assert!(result.anomalies.is_empty());
    }

    #[test]
    fn zero_mean_and_zero_start_do_not_produce_nan() {
        let (points, now) = series(&[0.0, -1.0, 1.0, 0.0]);
        let result = analyze("a", points, &AnalyzerOptions::default(), now).unwrap();
        assert_eq!(result.direction, TrendDirection::Stable);
        assert!(result.confidence.is_finite() && (0.0..=1.0).contains(&result.confidence));
        assert!(result.strength.is_finite());
    }

    #[test]
    fn decreasing_series_direction() {
        let (points, now) = series(&[100.0, 90.0, 80.0, 70.0]);
        let result = analyze("a", points, &AnalyzerOptions::default(), now).unwrap();
        assert_eq!(result.direction, TrendDirection::Decreasing);
        assert_eq!(result.trend_type, TrendType::Strong(TrendDirection::Decreasing));
    }

    #[test]
    fn outlier_is_flagged_within_window() {
        let (points, now) = series(&[10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 60.0]);
        let result = analyze("a", points, &AnalyzerOptions::default(), now).unwrap();
        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].value, 60.0);
        assert!(result.anomalies[0].is_anomaly);
        assert_eq!(result.data_points.iter().filter(|p| p.is_anomaly).count(), 1);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let (points, now) = series(&[3.0, 900.0, -40.0, 12.0, 5000.0, 1.0]);
        let result = analyze("a", points, &AnalyzerOptions::default(), now).unwrap();
        assert!((0.0..=1.0).contains(&result.strength));
        assert!((0.0..=1.0).contains(&result.confidence));
    }
}
