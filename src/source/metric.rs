use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::MetricSourceConfig;
use crate::types::DataPoint;
use super::{Ingest, StreamSource};

/// Simulated metric stream: baseline plus uniform noise, a per-tick drift and
/// occasional multiplicative spikes.
pub struct SimulatedMetricSource {
    name: String,
    data_source: String,
    metric: String,
    baseline: f64,
    noise: f64,
    drift: f64,
    spike_probability: f64,
    spike_factor: f64,
    training_samples: usize,
    interval_secs: u64,
    analyzer_id: Option<String>,
    detector_id: Option<String>,
    rng: StdRng,
    ticks: u64,
}

impl SimulatedMetricSource {
    pub fn new(config: &MetricSourceConfig, analyzer_id: Option<String>, detector_id: Option<String>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            name: config.name.clone(),
            data_source: config.data_source.clone(),
            metric: config.metric.clone(),
            baseline: config.baseline,
            noise: config.noise.abs(),
            drift: config.drift,
            spike_probability: config.spike_probability.clamp(0.0, 1.0),
            spike_factor: config.spike_factor,
            training_samples: config.training_samples,
            interval_secs: config.interval_secs.max(1),
            analyzer_id,
            detector_id,
            rng,
            ticks: 0,
        }
    }

    fn jitter(&mut self) -> f64 {
        if self.noise == 0.0 {
            0.0
        } else {
            self.rng.gen_range(-self.noise..=self.noise)
        }
    }

    /// Spike-free history ending at `now`, used to train the detector
    pub fn training_points(&mut self, now: DateTime<Utc>) -> Vec<DataPoint> {
        let n = self.training_samples;
        (0..n)
            .map(|i| {
                let ts = now - Duration::seconds(((n - i) as u64 * self.interval_secs) as i64);
                let value = self.baseline + self.jitter();
                DataPoint::new(value, ts)
            })
            .collect()
    }

    fn next_point(&mut self, now: DateTime<Utc>) -> DataPoint {
        let mut value = self.baseline + self.drift * self.ticks as f64 + self.jitter();
        let spiked = self.rng.gen_bool(self.spike_probability);
        if spiked {
            value *= self.spike_factor;
        }
        self.ticks += 1;

        let mut point = DataPoint::new(value, now);
        point.metadata.insert("data_source".into(), self.data_source.clone());
        point.metadata.insert("metric".into(), self.metric.clone());
        if spiked {
            point.metadata.insert("simulated_spike".into(), "true".into());
        }
        point
    }
}

#[async_trait]
impl StreamSource for SimulatedMetricSource {
    fn name(&self) -> &str { &self.name }

    async fn poll(&mut self, now: DateTime<Utc>) -> Result<Vec<Ingest>> {
        let point = self.next_point(now);
        Ok(vec![Ingest::Point {
            analyzer_id: self.analyzer_id.clone(),
            detector_id: self.detector_id.clone(),
            point,
        }])
    }

    fn interval_secs(&self) -> u64 {
        self.interval_secs
    }
}
