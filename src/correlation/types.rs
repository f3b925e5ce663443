use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Event, PatternType};
use crate::window::Timestamped;

pub type Conditions = serde_json::Map<String, serde_json::Value>;

/// A correlation rule.
///
/// `pattern` is matched against the whole `event_type`; an empty pattern or
/// `*` matches every type. Every entry in `conditions` must be present in the
/// event's data with an equal value.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationRule {
    pub id: String,
    pub name: String,
    pub pattern: String,
    pub conditions: Conditions,
    pub action: String,
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl CorrelationRule {
    pub fn conditions_match(&self, event: &Event) -> bool {
        self.conditions
            .iter()
            .all(|(k, v)| event.data.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub pattern: Option<String>,
    pub conditions: Option<Conditions>,
    pub action: Option<String>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationResult {
    pub id: String,
    pub rule_id: String,
    /// Correlated events in timestamp order
    pub events: Vec<Event>,
    pub correlation_score: f64,
    pub is_significant: bool,
    pub correlated_at: DateTime<Utc>,
}

impl CorrelationResult {
    pub fn involves_source(&self, source: &str) -> bool {
        self.events.iter().any(|e| e.source == source)
    }
}

impl Timestamped for CorrelationResult {
    fn timestamp(&self) -> DateTime<Utc> {
        self.correlated_at
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPattern {
    pub id: String,
    pub source: String,
    pub event_type: String,
    pub pattern_type: PatternType,
    pub event_ids: Vec<String>,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
}

/// Fraction of the first event's fields that every other event carries
/// with the same value. Zero when the first event has no fields.
pub fn field_overlap(events: &[Event]) -> f64 {
    let (first, rest) = match events.split_first() {
        Some(split) => split,
        None => return 0.0,
    };
    if first.data.is_empty() {
        return 0.0;
    }
    let common = first
        .data
        .iter()
        .filter(|(k, v)| rest.iter().all(|e| e.data.get(*k) == Some(*v)))
        .count();
    common as f64 / first.data.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn event(fields: serde_json::Value) -> Event {
        let ts = Utc.with_ymd_and_hms(2024, 2, 2, 9, 0, 0).unwrap();
        let mut e = Event::new("shelter-api", "intake", ts);
        if let serde_json::Value::Object(map) = fields {
            e.data = map;
        }
        e
    }

    #[test]
    fn overlap_counts_equal_values_only() {
        let a = event(json!({"region": "north", "priority": 2, "kind": "food", "count": 5}));
        let b = event(json!({"region": "north", "priority": 2, "kind": "food", "count": 9}));
        assert!((field_overlap(&[a.clone(), b]) - 0.75).abs() < 1e-12);
        assert_eq!(field_overlap(&[a.clone()]), 1.0);
        assert_eq!(field_overlap(&[]), 0.0);
        assert_eq!(field_overlap(&[event(json!({})), a]), 0.0);
    }

    #[test]
    fn conditions_require_exact_values() {
        let rule = CorrelationRule {
            id: "r".into(),
            name: "r".into(),
            pattern: String::new(),
            conditions: json!({"X": 42}).as_object().cloned().unwrap_or_default(),
            action: "notify".into(),
            priority: 0,
            is_active: true,
            created_at: Utc::now(),
        };
        assert!(rule.conditions_match(&event(json!({"X": 42, "y": 1}))));
        assert!(!rule.conditions_match(&event(json!({"X": "42"}))));
        assert!(!rule.conditions_match(&event(json!({"y": 1}))));
    }
}
