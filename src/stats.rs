//! Small numeric helpers shared by the analyzers.
//!
//! Every helper degrades to `0.0` on empty input or a zero denominator so
//! that callers never see `NaN` or infinity.

use chrono::{DateTime, Utc};

const EPS: f64 = 1e-10;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// `a / b`, or zero when `b` is (close to) zero or the result is not finite.
pub fn safe_div(a: f64, b: f64) -> f64 {
    if b.abs() < EPS {
        return 0.0;
    }
    let r = a / b;
    if r.is_finite() { r } else { 0.0 }
}

pub fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 1.0)
}

/// Ordinary least squares fit of `ys` against `xs`.
/// Returns (slope, intercept, r_squared).
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<(f64, f64, f64)> {
    let n = xs.len() as f64;
    if n < 2.0 || xs.len() != ys.len() { return None; }

    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(ys).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = xs.iter().map(|x| x * x).sum();

    let denom = n * sum_x2 - sum_x * sum_x;
    if denom.abs() < EPS { return None; }

    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let mean_x = sum_x / n;
    let mean_y = sum_y / n;
    let intercept = mean_y - slope * mean_x;

    let ss_res: f64 = xs.iter().zip(ys).map(|(x, y)| {
        let predicted = slope * x + intercept;
        (y - predicted).powi(2)
    }).sum();
    let ss_tot: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
    let r_squared = if ss_tot > EPS { 1.0 - ss_res / ss_tot } else { 0.0 };

    Some((slope, intercept, r_squared))
}

/// Regularity of the gaps between sorted timestamps:
/// `max(0, 1 - stddev(intervals) / mean(intervals))`.
pub fn temporal_consistency(sorted: &[DateTime<Utc>]) -> f64 {
    if sorted.len() < 2 {
        return 0.0;
    }
    let intervals: Vec<f64> = sorted
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
        .collect();
    let m = mean(&intervals);
    if m.abs() < EPS {
        return 0.0;
    }
    (1.0 - std_dev(&intervals) / m).max(0.0)
}
