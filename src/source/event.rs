use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::EventSourceConfig;
use crate::types::{Event, Severity};
use super::{Ingest, StreamSource};

/// Distinct values a simulated field can take
const FIELD_CARDINALITY: u32 = 3;
const DEFAULT_EVENT_TYPE: &str = "generic";

/// Simulated event stream with random types, field values and severities
pub struct SimulatedEventSource {
    name: String,
    event_types: Vec<String>,
    events_per_tick: usize,
    fields: Vec<String>,
    interval_secs: u64,
    rng: StdRng,
}

impl SimulatedEventSource {
    pub fn new(config: &EventSourceConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            name: config.name.clone(),
            event_types: config.event_types.clone(),
            events_per_tick: config.events_per_tick,
            fields: config.fields.clone(),
            interval_secs: config.interval_secs.max(1),
            rng,
        }
    }

    fn severity(&mut self) -> Severity {
        match self.rng.gen_range(0..100) {
            0..=79 => Severity::Info,
            80..=94 => Severity::Warn,
            95..=98 => Severity::Critical,
            _ => Severity::Emergency,
        }
    }

    fn next_event(&mut self, now: DateTime<Utc>) -> Event {
        let event_type = self.event_types
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());
        let severity = self.severity();

        let mut event = Event::new(self.name.clone(), event_type, now).with_severity(severity);
        for field in &self.fields {
            let value = format!("{}-{}", field, self.rng.gen_range(0..FIELD_CARDINALITY));
            event.data.insert(field.clone(), value.into());
        }
        event
    }
}

#[async_trait]
impl StreamSource for SimulatedEventSource {
    fn name(&self) -> &str { &self.name }

    async fn poll(&mut self, now: DateTime<Utc>) -> Result<Vec<Ingest>> {
        Ok((0..self.events_per_tick)
            .map(|_| Ingest::Event(self.next_event(now)))
            .collect())
    }

    fn interval_secs(&self) -> u64 {
        self.interval_secs
    }
}
