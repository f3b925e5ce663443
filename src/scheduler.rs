//! Periodic driver: polls sources, feeds the engine, prunes windows and
//! forwards alerts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::AnalyticsEngine;
use crate::source::{Ingest, StreamSource};
use crate::types::Alert;

struct SourceSlot {
    source: Box<dyn StreamSource>,
    next_due: Option<DateTime<Utc>>,
}

/// Counters for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub polled: usize,
    pub points: usize,
    pub events: usize,
    pub anomalies: usize,
    pub correlations: usize,
    pub alerts: usize,
    pub pruned: usize,
}

pub struct Scheduler {
    engine: Arc<AnalyticsEngine>,
    sources: Vec<SourceSlot>,
    alert_tx: mpsc::Sender<Alert>,
    tick_interval: Duration,
    ticks: u64,
}

/// Running scheduler task
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<u64>,
}

impl SchedulerHandle {
    /// Signal the loop to stop and wait for it. Returns the ticks executed.
    pub async fn stop(self) -> u64 {
        let _ = self.stop_tx.send(true);
        match self.join.await {
            Ok(ticks) => ticks,
            Err(e) => {
                tracing::error!(error = %e, "Scheduler task failed");
                0
            }
        }
    }
}

impl Scheduler {
    pub fn new(
        engine: Arc<AnalyticsEngine>,
        sources: Vec<Box<dyn StreamSource>>,
        alert_tx: mpsc::Sender<Alert>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            engine,
            sources: sources
                .into_iter()
                .map(|source| SourceSlot { source, next_due: None })
                .collect(),
            alert_tx,
            tick_interval,
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one cycle.
    pub async fn tick(&mut self) -> TickReport {
        let now = self.engine.now();
        let mut report = TickReport::default();
        let mut alerts = Vec::new();

        let mut produced = Vec::new();
        for slot in self.sources.iter_mut() {
            if slot.next_due.map_or(false, |due| now < due) {
                continue;
            }
            report.polled += 1;
            match slot.source.poll(now).await {
                Ok(items) => produced.extend(items),
                Err(e) => {
                    tracing::warn!(source = slot.source.name(), error = %e, "Source poll failed");
                }
            }
            slot.next_due = Some(now + chrono::Duration::seconds(slot.source.interval_secs() as i64));
        }

        for item in produced {
            match item {
                Ingest::Point { analyzer_id, detector_id, point } => {
                    report.points += 1;
                    if let Some(id) = analyzer_id {
                        if let Err(e) = self.engine.trends().add_data_point(&id, point.clone()) {
                            tracing::warn!(analyzer_id = %id, error = %e, "Failed to ingest data point");
                        }
                    }
                    if let Some(id) = detector_id {
                        match self.engine.detect_anomaly(&id, point).await {
                            Ok(Some(anomaly)) => {
                                report.anomalies += 1;
                                alerts.push(self.engine.anomaly_alert(&anomaly));
                            }
                            Ok(None) => {}
                            Err(e) => {
                                tracing::warn!(detector_id = %id, error = %e, "Anomaly detection failed");
                            }
                        }
                    }
                }
                Ingest::Event(event) => {
                    report.events += 1;
                    match self.engine.process_event(event) {
                        Ok(results) => {
                            report.correlations += results.len();
                            alerts.extend(results.iter().filter_map(|r| self.engine.correlation_alert(r)));
                        }
                        Err(e) => tracing::warn!(error = %e, "Event processing failed"),
                    }
                }
            }
        }

        report.pruned = self.engine.prune_all();
        alerts.extend(self.engine.trend_alerts());

        report.alerts = alerts.len();
        for alert in alerts {
            if self.alert_tx.send(alert).await.is_err() {
                tracing::warn!("Alert channel closed, dropping alerts");
                break;
            }
        }

        self.ticks += 1;
        tracing::debug!(
            tick = self.ticks,
            polled = report.polled,
            points = report.points,
            events = report.events,
            anomalies = report.anomalies,
            alerts = report.alerts,
            "Scheduler tick"
        );
        report
    }

    /// Tick on a fixed interval until `shutdown` turns true or its sender drops
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_ms = self.tick_interval.as_millis() as u64,
            sources = self.sources.len(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(ticks = self.ticks, "Scheduler stopped");
        self.ticks
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(stop_rx));
        SchedulerHandle { stop_tx, join }
    }
}
