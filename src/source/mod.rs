pub mod event;
pub mod metric;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::anomaly::DetectionType;
use crate::config::{Config, SourceConfig};
use crate::engine::AnalyticsEngine;
use crate::types::{DataPoint, Event};

/// Something a source produced for the engine
#[derive(Debug, Clone)]
pub enum Ingest {
    /// A measurement for an analyzer and/or a detector
    Point {
        analyzer_id: Option<String>,
        detector_id: Option<String>,
        point: DataPoint,
    },
    Event(Event),
}

/// Trait for all stream sources.
///
/// A source is polled by the scheduler once its interval has elapsed and
/// returns whatever it produced since the previous poll.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Human-readable name for this source
    fn name(&self) -> &str;

    /// Poll the source. `now` is the engine clock's time.
    async fn poll(&mut self, now: DateTime<Utc>) -> Result<Vec<Ingest>>;

    /// Polling interval in seconds
    fn interval_secs(&self) -> u64;
}

/// Create every configured source, registering the analyzers and detectors
/// that metric sources feed.
pub fn create_sources(config: &Config, engine: &AnalyticsEngine) -> Result<Vec<Box<dyn StreamSource>>> {
    let mut sources: Vec<Box<dyn StreamSource>> = Vec::new();

    for source in &config.sources {
        match source {
            SourceConfig::Metric(mc) => {
                let detection_type = DetectionType::parse(&mc.detection_type)
                    .with_context(|| format!("source {}: unknown detection type {:?}", mc.name, mc.detection_type))?;

                let analyzer_id = engine.trends()
                    .create_analyzer(&mc.name, &mc.data_source, &mc.metric, None)
                    .with_context(|| format!("source {}: failed to create analyzer", mc.name))?;
                let detector_id = engine.anomalies()
                    .create_detector(&mc.name, &mc.data_source, detection_type, None)
                    .with_context(|| format!("source {}: failed to create detector", mc.name))?;

                let mut metric = metric::SimulatedMetricSource::new(mc, Some(analyzer_id), Some(detector_id.clone()));
                let training = metric.training_points(engine.now());
                engine.train_detector(&detector_id, training)
                    .with_context(|| format!("source {}: failed to train detector", mc.name))?;

                sources.push(Box::new(metric));
            }
            SourceConfig::Event(ec) => {
                sources.push(Box::new(event::SimulatedEventSource::new(ec)));
            }
        }
    }

    tracing::info!(count = sources.len(), "Initialized stream sources");
    Ok(sources)
}
