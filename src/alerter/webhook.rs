use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::config::WebhookConfig;
use crate::types::{Alert, Severity};
use super::AlertChannel;

/// POSTs each alert as JSON to a configured URL
pub struct WebhookChannel {
    url: String,
    headers: std::collections::HashMap<String, String>,
    severity_filter: Vec<Severity>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let severity_filter = config.severity_filter.iter()
            .filter_map(|s| {
                let parsed = Severity::parse(s);
                if parsed.is_none() {
                    tracing::warn!(severity = %s, "Ignoring unknown webhook severity filter");
                }
                parsed
            })
            .collect();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build webhook HTTP client")?;

        Ok(Self {
            url: config.url.clone(),
            headers: config.headers.clone(),
            severity_filter,
            client,
        })
    }

    fn payload(alert: &Alert) -> serde_json::Value {
        json!({
            "instance": &alert.instance,
            "kind": alert.kind.to_string(),
            "subject": &alert.subject,
            "value": alert.value,
            "threshold": alert.threshold,
            "severity": alert.severity.to_string(),
            "message": &alert.message,
            "labels": alert.labels.iter().map(|l| (l.key.clone(), json!(l.value))).collect::<serde_json::Map<_, _>>(),
            "timestamp": alert.timestamp.to_rfc3339(),
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str { "webhook" }

    fn accepts_severity(&self, severity: &Severity) -> bool {
        self.severity_filter.is_empty() || self.severity_filter.contains(severity)
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let mut req = self.client.post(&self.url).json(&Self::payload(alert));
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }

        req.send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?
            .error_for_status()?;
        Ok(())
    }
}
