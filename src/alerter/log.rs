use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Alert, Severity};
use super::AlertChannel;

/// Writes alerts to the structured log, at a level matching their severity
pub struct LogChannel {
    min_severity: Severity,
}

impl LogChannel {
    pub fn new() -> Self {
        Self { min_severity: Severity::Info }
    }

    pub fn with_min_severity(min_severity: Severity) -> Self {
        Self { min_severity }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str { "log" }

    fn accepts_severity(&self, severity: &Severity) -> bool {
        *severity >= self.min_severity
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let labels = alert.labels
            .iter()
            .map(|l| format!("{}={}", l.key, l.value))
            .collect::<Vec<_>>()
            .join(",");

        match alert.severity {
            Severity::Info => tracing::info!(
                kind = %alert.kind, subject = %alert.subject, value = alert.value,
                labels = %labels, instance = %alert.instance, "{}", alert.message
            ),
            Severity::Warn => tracing::warn!(
                kind = %alert.kind, subject = %alert.subject, value = alert.value,
                labels = %labels, instance = %alert.instance, "{}", alert.message
            ),
            Severity::Critical | Severity::Emergency => tracing::error!(
                severity = %alert.severity, kind = %alert.kind, subject = %alert.subject,
                value = alert.value, labels = %labels, instance = %alert.instance,
                "{}", alert.message
            ),
        }
        Ok(())
    }
}
