use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::OnceLock;

use crate::error::EngineError;

/// Top-level configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Name stamped on every alert
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { instance: default_instance(), log_level: default_log_level() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrendConfig {
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,
    #[serde(default = "default_min_points")]
    pub min_points: usize,
    #[serde(default = "default_forecast_steps")]
    pub forecast_steps: usize,
    #[serde(default = "default_forecast_interval")]
    pub forecast_interval_minutes: u64,
    #[serde(default = "default_high_strength")]
    pub high_strength_alert: f64,
    #[serde(default = "default_low_confidence")]
    pub low_confidence_alert: f64,
    /// How long analysis results stay queryable
    #[serde(default = "default_history_hours")]
    pub history_hours: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            min_points: 3,
            forecast_steps: 5,
            forecast_interval_minutes: 5,
            high_strength_alert: 0.8,
            low_confidence_alert: 0.5,
            history_hours: 24,
            history_capacity: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnomalyConfig {
    #[serde(default = "default_sensitivity")]
    pub default_sensitivity: f64,
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,
    #[serde(default = "default_forest_trees")]
    pub isolation_trees: usize,
    #[serde(default = "default_forest_depth")]
    pub isolation_max_depth: usize,
    #[serde(default = "default_knn")]
    pub density_neighbors: usize,
    /// Seed for the isolation-forest partitioning; random when unset
    pub seed: Option<u64>,
    /// Concurrent scorings allowed on the blocking pool; 0 disables the pool
    #[serde(default)]
    pub scoring_pool_size: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            default_sensitivity: 0.5,
            window_minutes: 60,
            isolation_trees: 10,
            isolation_max_depth: 10,
            density_neighbors: 5,
            seed: None,
            scoring_pool_size: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorrelationConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_lookback")]
    pub lookback_minutes: u64,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            lookback_minutes: 30,
            buffer_capacity: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick")]
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_secs: default_tick() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertingConfig {
    #[serde(default = "default_rate_per_min")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_true")]
    pub log_enabled: bool,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 10,
            dedup_window_secs: 300,
            channel_capacity: 1_000,
            log_enabled: true,
            webhook: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub severity_filter: Vec<String>,
}

/// A simulated stream polled by the scheduler
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Metric(MetricSourceConfig),
    Event(EventSourceConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricSourceConfig {
    pub name: String,
    pub data_source: String,
    pub metric: String,
    #[serde(default = "default_baseline")]
    pub baseline: f64,
    #[serde(default = "default_noise")]
    pub noise: f64,
    /// Per-tick drift added to the baseline
    #[serde(default)]
    pub drift: f64,
    #[serde(default = "default_spike_probability")]
    pub spike_probability: f64,
    #[serde(default = "default_spike_factor")]
    pub spike_factor: f64,
    /// Detection strategy of the detector created for this stream
    #[serde(default = "default_detection_type")]
    pub detection_type: String,
    #[serde(default = "default_training_samples")]
    pub training_samples: usize,
    #[serde(default = "default_source_interval")]
    pub interval_secs: u64,
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventSourceConfig {
    pub name: String,
    pub event_types: Vec<String>,
    #[serde(default = "default_events_per_tick")]
    pub events_per_tick: usize,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_source_interval")]
    pub interval_secs: u64,
    pub seed: Option<u64>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        // Expand environment variables
        let expanded = expand_env_vars(content);

        let config: Config = toml::from_str(&expanded)
            .with_context(|| "Failed to parse configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.anomaly.default_sensitivity) {
            return Err(EngineError::Config(format!(
                "anomaly.default_sensitivity must be within [0, 1], got {}",
                self.anomaly.default_sensitivity
            )));
        }
        if self.trend.window_minutes == 0 || self.anomaly.window_minutes == 0 {
            return Err(EngineError::Config("window_minutes must be positive".into()));
        }
        if self.trend.min_points < 3 {
            return Err(EngineError::Config("trend.min_points must be at least 3".into()));
        }
        if self.correlation.retention_hours == 0 || self.correlation.lookback_minutes == 0 {
            return Err(EngineError::Config("correlation horizons must be positive".into()));
        }
        if self.scheduler.tick_secs == 0 {
            return Err(EngineError::Config("scheduler.tick_secs must be positive".into()));
        }
        if self.anomaly.isolation_trees == 0 || self.anomaly.density_neighbors == 0 {
            return Err(EngineError::Config("anomaly model parameters must be positive".into()));
        }
        for source in &self.sources {
            let (name, interval) = match source {
                SourceConfig::Metric(m) => (&m.name, m.interval_secs),
                SourceConfig::Event(e) => (&e.name, e.interval_secs),
            };
            if interval == 0 {
                return Err(EngineError::Config(format!("source {}: interval_secs must be positive", name)));
            }
            if let SourceConfig::Metric(m) = source {
                if !(0.0..=1.0).contains(&m.spike_probability) {
                    return Err(EngineError::Config(format!(
                        "source {}: spike_probability must be within [0, 1]", name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> String {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").expect("static env var pattern")
    });
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .to_string()
}

// Default value functions
fn default_instance() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
fn default_log_level() -> String { "info".to_string() }
fn default_window_minutes() -> u64 { 60 }
fn default_min_points() -> usize { 3 }
fn default_forecast_steps() -> usize { 5 }
fn default_forecast_interval() -> u64 { 5 }
fn default_high_strength() -> f64 { 0.8 }
fn default_low_confidence() -> f64 { 0.5 }
fn default_history_hours() -> u64 { 24 }
fn default_history_capacity() -> usize { 1000 }
fn default_sensitivity() -> f64 { 0.5 }
fn default_forest_trees() -> usize { 10 }
fn default_forest_depth() -> usize { 10 }
fn default_knn() -> usize { 5 }
fn default_retention_hours() -> u64 { 24 }
fn default_lookback() -> u64 { 30 }
fn default_buffer_capacity() -> usize { 10_000 }
fn default_tick() -> u64 { 10 }
fn default_rate_per_min() -> u32 { 10 }
fn default_dedup_window() -> u64 { 300 }
fn default_channel_capacity() -> usize { 1_000 }
fn default_true() -> bool { true }
fn default_baseline() -> f64 { 100.0 }
fn default_noise() -> f64 { 5.0 }
fn default_spike_probability() -> f64 { 0.02 }
fn default_spike_factor() -> f64 { 3.0 }
fn default_detection_type() -> String { "statistical".to_string() }
fn default_training_samples() -> usize { 50 }
fn default_events_per_tick() -> usize { 1 }
fn default_source_interval() -> u64 { 10 }
