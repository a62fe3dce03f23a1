use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub pipeline: PipelineConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Folder the capture side drops screenshots into
    pub source_dir: String,
    pub base_url: String,
    pub poll_interval_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub capture_timeout_ms: u64,
    /// Persisted set of already-scanned candidates (disabled when absent)
    pub checkpoint_path: Option<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            source_dir: "screenshots".to_string(),
            base_url: "https://pump.fun".to_string(),
            poll_interval_secs: 5,
            max_retries: 3,
            retry_delay_ms: 500,
            capture_timeout_ms: 10_000,
            checkpoint_path: None,
        }
    }
}

impl ScannerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

/// What the producer does when a bounded queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the consumer to make room (back-pressure)
    #[default]
    Block,
    /// Discard the item being enqueued
    DropNewest,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detailed_volume: bool,
    /// `None` means unbounded
    pub queue_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
    pub shutdown_timeout_ms: u64,
    pub latency_report_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detailed_volume: true,
            queue_capacity: None,
            overflow: OverflowPolicy::Block,
            shutdown_timeout_ms: 5_000,
            latency_report_secs: 30,
        }
    }
}

impl PipelineConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn latency_report_interval(&self) -> Duration {
        Duration::from_secs(self.latency_report_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Folder holding accumulation.png, breakout.png, early_stage.png
    pub pattern_dir: String,
    /// Normalized cross-correlation needed for a template hit
    pub template_threshold: f64,
    /// Relative rise/fall needed to call a trend up or down
    pub trend_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            pattern_dir: "patterns".to_string(),
            template_threshold: 0.8,
            trend_threshold: 0.05,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// JSON-lines file receiving every scan event
    pub results_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// Try config.toml, then config.example.toml, then built-in defaults.
    ///
    /// Returns the path that was used, if any.
    pub fn load_or_default() -> Result<(Self, Option<&'static str>)> {
        for path in ["config.toml", "config.example.toml"] {
            if std::path::Path::new(path).exists() {
                return Ok((Self::load(path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> Result<()> {
        if self.scanner.poll_interval_secs == 0 {
            bail!("scanner.poll_interval_secs must be greater than 0");
        }
        if self.pipeline.queue_capacity == Some(0) {
            bail!("pipeline.queue_capacity must be greater than 0 (omit it for unbounded)");
        }
        if !(0.0..=1.0).contains(&self.analysis.template_threshold) {
            bail!("analysis.template_threshold must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.analysis.trend_threshold) {
            bail!("analysis.trend_threshold must be within [0, 1]");
        }
        Ok(())
    }
}
