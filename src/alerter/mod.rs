pub mod log;
#[cfg(feature = "webhook")]
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::AlertingConfig;
use crate::types::{Alert, AlertKind, Severity};

/// Trait for alert delivery channels
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel name
    fn name(&self) -> &str;

    /// Send a single alert
    async fn send(&self, alert: &Alert) -> Result<()>;

    /// Check if this channel accepts the given severity
    fn accepts_severity(&self, severity: &Severity) -> bool;
}

/// What happened to a dispatched alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    Deduplicated,
    RateLimited,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: u64,
    pub deduplicated: u64,
    pub rate_limited: u64,
    pub channel_failures: u64,
}

/// Manages alert dispatch, rate limiting, and deduplication
pub struct AlertManager {
    channels: Vec<Box<dyn AlertChannel>>,
    dedup_map: HashMap<DeduplicationKey, DedupEntry>,
    dedup_window: Duration,
    rate_limiter: RateLimiter,
    stats: DispatchStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DeduplicationKey {
    kind: AlertKind,
    subject: String,
    severity: Severity,
}

impl DeduplicationKey {
    fn of(alert: &Alert) -> Self {
        Self {
            kind: alert.kind,
            subject: alert.subject.clone(),
            severity: alert.severity,
        }
    }
}

struct DedupEntry {
    last_sent: Instant,
    count: u32,
}

/// Token bucket refilled continuously at `per_minute / 60` tokens per second
struct RateLimiter {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl RateLimiter {
    fn new(per_minute: u32) -> Self {
        Self {
            tokens: per_minute as f64,
            max_tokens: per_minute as f64,
            refill_rate: per_minute as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl AlertManager {
    /// Build the channels enabled in `config`
    pub fn new(config: &AlertingConfig) -> Result<Self> {
        let mut channels: Vec<Box<dyn AlertChannel>> = Vec::new();

        if config.log_enabled {
            channels.push(Box::new(log::LogChannel::new()));
        }

        if let Some(ref wc) = config.webhook {
            if wc.enabled {
                #[cfg(feature = "webhook")]
                channels.push(Box::new(webhook::WebhookChannel::new(wc)?));
                #[cfg(not(feature = "webhook"))]
                tracing::warn!(url = %wc.url, "Webhook channel configured but the `webhook` feature is disabled");
            }
        }

        tracing::info!(channels = channels.len(), "Initialized alert channels");
        Ok(Self::with_channels(config, channels))
    }

    pub fn with_channels(config: &AlertingConfig, channels: Vec<Box<dyn AlertChannel>>) -> Self {
        Self {
            channels,
            dedup_map: HashMap::new(),
            dedup_window: Duration::from_secs(config.dedup_window_secs),
            rate_limiter: RateLimiter::new(config.rate_limit_per_minute),
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Deduplicate, rate limit and fan out one alert.
    /// EMERGENCY alerts bypass both the dedup window and the rate limit.
    pub async fn dispatch(&mut self, alert: Alert) -> Dispatch {
        let key = DeduplicationKey::of(&alert);
        let bypass = alert.severity >= Severity::Emergency;

        if let Some(entry) = self.dedup_map.get_mut(&key) {
            if entry.last_sent.elapsed() < self.dedup_window && !bypass {
                entry.count += 1;
                self.stats.deduplicated += 1;
                tracing::debug!(kind = %alert.kind, subject = %alert.subject, count = entry.count, "Alert deduplicated");
                return Dispatch::Deduplicated;
            }
        }

        if !bypass && !self.rate_limiter.try_acquire() {
            self.stats.rate_limited += 1;
            tracing::warn!(kind = %alert.kind, subject = %alert.subject, "Alert rate limited");
            return Dispatch::RateLimited;
        }

        for channel in &self.channels {
            if channel.accepts_severity(&alert.severity) {
                if let Err(e) = channel.send(&alert).await {
                    self.stats.channel_failures += 1;
                    tracing::error!(
                        channel = channel.name(),
                        error = %e,
                        "Failed to send alert"
                    );
                }
            }
        }

        self.stats.sent += 1;
        self.dedup_map.insert(key, DedupEntry {
            last_sent: Instant::now(),
            count: 1,
        });
        Dispatch::Sent
    }

    /// Drain `rx` until every sender is gone
    pub async fn run(mut self, mut rx: mpsc::Receiver<Alert>) -> DispatchStats {
        while let Some(alert) = rx.recv().await {
            self.dispatch(alert).await;
        }
        tracing::info!(
            sent = self.stats.sent,
            deduplicated = self.stats.deduplicated,
            rate_limited = self.stats.rate_limited,
            "Alert dispatcher stopped"
        );
        self.stats
    }
}
