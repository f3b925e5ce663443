//! Burst / sequential / random classification shared by anomaly and event patterns.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::types::PatternType;

/// Classify occurrences given their timestamps in arrival order.
///
/// A burst needs more than `burst_min_count` items spanning less than
/// `burst_span`. Otherwise the set is sequential when arrival order never
/// goes back in time.
pub fn classify(
    in_arrival_order: &[DateTime<Utc>],
    burst_span: Duration,
    burst_min_count: usize,
) -> PatternType {
    let (first, last) = match (in_arrival_order.iter().min(), in_arrival_order.iter().max()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return PatternType::Random,
    };

    if last - first < burst_span && in_arrival_order.len() > burst_min_count {
        PatternType::Burst
    } else if in_arrival_order.windows(2).all(|w| w[0] <= w[1]) {
        PatternType::Sequential
    } else {
        PatternType::Random
    }
}

/// Most frequent label and the fraction of items carrying it.
/// Ties go to the smallest label.
pub fn dominant<T: Ord + Copy>(labels: &[T]) -> Option<(T, f64)> {
    let mut counts: BTreeMap<T, usize> = BTreeMap::new();
    for l in labels {
        *counts.entry(*l).or_default() += 1;
    }
    let (label, count) = counts
        .into_iter()
        .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then(lb.cmp(la)))?;
    Some((label, count as f64 / labels.len() as f64))
}
