pub mod types;

use std::collections::HashSet;

use chrono::Duration;
use dashmap::DashMap;
use regex::Regex;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::CorrelationConfig;
use crate::error::{EngineError, EngineResult};
use crate::pattern;
use crate::stats::{clamp01, temporal_consistency};
use crate::types::{Event, TimeRange};
use crate::window::WindowStore;

pub use types::{field_overlap, Conditions, CorrelationResult, CorrelationRule, EventPattern, RuleUpdate};

const MIN_CORRELATED_EVENTS: usize = 2;
const MIN_PATTERN_EVENTS: usize = 3;
const BURST_SPAN_MINUTES: i64 = 5;
const BURST_MIN_COUNT: usize = 5;
const SIGNIFICANCE: f64 = 0.7;
/// Total gap (in minutes) at which the time score reaches zero
const TIME_SCORE_HORIZON_MINUTES: f64 = 60.0;

struct CompiledRule {
    rule: CorrelationRule,
    /// `None` matches every event type
    matcher: Option<Regex>,
}

impl CompiledRule {
    fn matches(&self, event: &Event) -> bool {
        self.rule.is_active
            && self.matcher.as_ref().map_or(true, |re| re.is_match(&event.event_type))
            && self.rule.conditions_match(event)
    }
}

/// Keep the first copy of each event id
fn unique_by_id(events: Vec<Event>) -> Vec<Event> {
    let mut seen = HashSet::new();
    events.into_iter().filter(|e| seen.insert(e.id.clone())).collect()
}

fn compile_pattern(pattern: &str) -> EngineResult<Option<Regex>> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() || trimmed == "*" {
        return Ok(None);
    }
    Regex::new(&format!("^(?:{})$", trimmed))
        .map(Some)
        .map_err(|e| EngineError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Buffers events per source and links related events through rules.
pub struct EventCorrelator {
    config: CorrelationConfig,
    clock: SharedClock,
    rules: DashMap<String, CompiledRule>,
    events: WindowStore<Event>,
    results: DashMap<String, CorrelationResult>,
}

impl EventCorrelator {
    pub fn new(config: &CorrelationConfig, clock: SharedClock) -> Self {
        Self {
            config: config.clone(),
            clock,
            rules: DashMap::new(),
            events: WindowStore::new(
                Duration::hours(config.retention_hours as i64),
                config.buffer_capacity,
            ),
            results: DashMap::new(),
        }
    }

    pub fn create_rule(
        &self,
        name: &str,
        pattern: &str,
        conditions: Conditions,
        action: &str,
    ) -> EngineResult<String> {
        let matcher = compile_pattern(pattern)?;
        let rule = CorrelationRule {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            pattern: pattern.to_string(),
            conditions,
            action: action.to_string(),
            priority: 0,
            is_active: true,
            created_at: self.clock.now(),
        };
        let id = rule.id.clone();
        tracing::info!(rule_id = %id, name, pattern, action, "Created correlation rule");
        self.rules.insert(id.clone(), CompiledRule { rule, matcher });
        Ok(id)
    }

    pub fn get_rule(&self, id: &str) -> EngineResult<CorrelationRule> {
        self.rules
            .get(id)
            .map(|r| r.rule.clone())
            .ok_or_else(|| EngineError::not_found("rule", id))
    }

    /// All rules, highest priority first
    pub fn list_rules(&self) -> Vec<CorrelationRule> {
        let mut rules: Vec<CorrelationRule> = self.rules.iter().map(|r| r.rule.clone()).collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        rules
    }

    pub fn update_rule(&self, id: &str, update: RuleUpdate) -> EngineResult<CorrelationRule> {
        let matcher = update.pattern.as_deref().map(compile_pattern).transpose()?;
        let mut entry = self.rules
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("rule", id))?;

        if let (Some(pattern), Some(matcher)) = (update.pattern, matcher) {
            entry.rule.pattern = pattern;
            entry.matcher = matcher;
        }
        let rule = &mut entry.rule;
        if let Some(name) = update.name {
            rule.name = name;
        }
        if let Some(conditions) = update.conditions {
            rule.conditions = conditions;
        }
        if let Some(action) = update.action {
            rule.action = action;
        }
        if let Some(priority) = update.priority {
            rule.priority = priority;
        }
        if let Some(active) = update.is_active {
            rule.is_active = active;
        }
        Ok(rule.clone())
    }

    pub fn delete_rule(&self, id: &str) -> EngineResult<()> {
        self.rules
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found("rule", id))
    }

    /// Buffer an event and run every matching rule over its look-back window.
    ///
    /// Rules run in descending priority. Each rule that finds at least two
    /// related events (the trigger included) yields one result.
    pub fn process_event(&self, event: Event) -> EngineResult<Vec<CorrelationResult>> {
        let now = self.clock.now();
        self.events.add(&event.source, event.clone(), now);

        let mut matching: Vec<(i32, String)> = self.rules
            .iter()
            .filter(|r| r.matches(&event))
            .map(|r| (r.rule.priority, r.rule.id.clone()))
            .collect();
        if matching.is_empty() {
            return Ok(Vec::new());
        }
        matching.sort_by(|a, b| b.0.cmp(&a.0));

        let lookback = TimeRange::new(
            event.timestamp - Duration::minutes(self.config.lookback_minutes as i64),
            event.timestamp,
        );
        let related = unique_by_id(self.events.collect_where(|e| lookback.contains(e.timestamp)));
        if related.len() < MIN_CORRELATED_EVENTS {
            return Ok(Vec::new());
        }

        Ok(matching
            .into_iter()
            .filter_map(|(_, rule_id)| self.correlate(&rule_id, related.clone()))
            .collect())
    }

    /// Score a set of buffered events against each other.
    ///
    /// `time_score = max(0, 1 - total gap minutes / 60)` and `data_score` is
    /// the first event's field overlap with the rest; the correlation score
    /// is their mean. Ids that are no longer buffered are skipped.
    pub fn correlate_events(&self, rule_id: &str, event_ids: &[String]) -> EngineResult<Option<CorrelationResult>> {
        self.get_rule(rule_id)?;

        let wanted: HashSet<&str> = event_ids.iter().map(String::as_str).collect();
        let events = unique_by_id(self.events.collect_where(|e| wanted.contains(e.id.as_str())));
        Ok(self.correlate(rule_id, events))
    }

    fn correlate(&self, rule_id: &str, mut events: Vec<Event>) -> Option<CorrelationResult> {
        if events.len() < MIN_CORRELATED_EVENTS {
            return None;
        }
        events.sort_by_key(|e| e.timestamp);

        let gap_minutes: f64 = events
            .windows(2)
            .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 60_000.0)
            .sum();
        let time_score = (1.0 - gap_minutes / TIME_SCORE_HORIZON_MINUTES).max(0.0);
        let data_score = field_overlap(&events);
        let correlation_score = clamp01((time_score + data_score) / 2.0);

        let result = CorrelationResult {
            id: Uuid::new_v4().to_string(),
            rule_id: rule_id.to_string(),
            events,
            correlation_score,
            is_significant: correlation_score > SIGNIFICANCE,
            correlated_at: self.clock.now(),
        };

        tracing::debug!(
            rule_id,
            correlation_id = %result.id,
            events = result.events.len(),
            score = correlation_score,
            significant = result.is_significant,
            "Correlated events"
        );
        self.results.insert(result.id.clone(), result.clone());
        Some(result)
    }

    /// Classify one source's events of a given type within `range`
    pub fn detect_pattern(&self, source: &str, event_type: &str, range: &TimeRange) -> Option<EventPattern> {
        let events: Vec<Event> = self.events
            .items_between(source, range)
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect();
        if events.len() < MIN_PATTERN_EVENTS {
            return None;
        }

        let in_order: Vec<_> = events.iter().map(|e| e.timestamp).collect();
        let pattern_type = pattern::classify(
            &in_order,
            Duration::minutes(BURST_SPAN_MINUTES),
            BURST_MIN_COUNT,
        );
        let mut sorted = in_order.clone();
        sorted.sort();
        let confidence = clamp01((temporal_consistency(&sorted) + field_overlap(&events)) / 2.0);

        Some(EventPattern {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            event_type: event_type.to_string(),
            pattern_type,
            event_ids: events.iter().map(|e| e.id.clone()).collect(),
            count: events.len(),
            first_seen: *sorted.first()?,
            last_seen: *sorted.last()?,
            confidence,
            detected_at: self.clock.now(),
        })
    }

    /// Buffered events of one source within `range`, in arrival order
    pub fn get_events(&self, source: &str, range: &TimeRange) -> Vec<Event> {
        self.events.items_between(source, range)
    }

    /// Correlations touching `source` that were computed within `range`
    pub fn find_correlations(&self, source: &str, range: &TimeRange) -> Vec<CorrelationResult> {
        let mut found: Vec<CorrelationResult> = self.results
            .iter()
            .filter(|r| range.contains(r.correlated_at) && r.involves_source(source))
            .map(|r| r.clone())
            .collect();
        found.sort_by_key(|r| r.correlated_at);
        found
    }

    pub fn get_correlation(&self, id: &str) -> EngineResult<CorrelationResult> {
        self.results
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| EngineError::not_found("correlation", id))
    }

    pub fn sources(&self) -> Vec<String> {
        self.events.keys()
    }

    /// Drop buffered events and results older than the retention horizon
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let cutoff = now - Duration::hours(self.config.retention_hours as i64);
        let before = self.results.len();
        self.results.retain(|_, r| r.correlated_at >= cutoff);
        self.events.prune_all(now) + (before - self.results.len())
    }
}
