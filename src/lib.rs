// SwarmScan - chart scanner
// Captures a chart screenshot per new candidate and scores it for early-stage signals

pub mod analyzer;
pub mod capture;
pub mod config;
pub mod detectors;
pub mod error;
pub mod latency;
pub mod pipeline;
pub mod scoring;
pub mod sink;
pub mod types;
pub mod vision;

pub use analyzer::ChartAnalyzer;
pub use config::Config;
pub use pipeline::{PipelineHandle, PipelineReport, PipelineSettings, ScanPipeline};
