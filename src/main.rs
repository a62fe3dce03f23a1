// SwarmScan - chart scanner
// Watches the capture folder, analyzes each new candidate's chart, reports a score

use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use swarm_scan::capture::DirectoryCaptureSource;
use swarm_scan::config::{Config, MonitoringConfig};
use swarm_scan::detectors::PatternLibrary;
use swarm_scan::sink::{spawn_record_writer, FanoutSink, LogSink};
use swarm_scan::{ChartAnalyzer, PipelineSettings, ScanPipeline};

#[derive(Parser, Debug)]
#[command(name = "swarm-scan", about = "Chart scanner for newly listed tokens")]
struct Cli {
    /// Config file (defaults to config.toml, then config.example.toml)
    #[arg(long)]
    config: Option<String>,

    /// Folder the capture side writes screenshots into
    #[arg(long)]
    source_dir: Option<String>,

    /// Single discovery pass, then drain the queue and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Run the volume-profile detector
    #[arg(long)]
    detailed_volume: Option<bool>,

    /// Bound the scan queue (unbounded when omitted)
    #[arg(long)]
    queue_capacity: Option<usize>,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (mut config, config_path) = match &cli.config {
        Some(path) => (Config::load(path)?, Some(path.as_str())),
        None => Config::load_or_default()?,
    };
    apply_overrides(&mut config, &cli);
    config.validate().context("Invalid configuration")?;

    init_logging(&config.monitoring);

    info!("🚀 SwarmScan Starting...");
    match config_path {
        Some(path) => info!("⚙️  Configuration loaded from {}", path),
        None => info!("⚙️  No config file found, using defaults"),
    }
    info!("   📂 Source: {}", config.scanner.source_dir);
    info!("   📊 Detailed volume: {}", config.pipeline.detailed_volume);

    let shutdown_timeout = config.pipeline.shutdown_timeout();
    block_on_bounded(run(config, cli.once), shutdown_timeout)
}

/// Drive `task` on a current-thread runtime, then give leftover blocking work
/// at most `shutdown_timeout` before returning
fn block_on_bounded<F>(task: F, shutdown_timeout: Duration) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(task);

    // an analysis cut off at shutdown may still occupy a blocking thread
    runtime.shutdown_timeout(shutdown_timeout);
    result
}

async fn run(config: Config, once: bool) -> Result<()> {
    let patterns = PatternLibrary::init_global(&config.analysis.pattern_dir);
    let analyzer = Arc::new(ChartAnalyzer::from_config(
        &config.analysis,
        config.pipeline.detailed_volume,
        patterns,
    ));

    let mut sinks = FanoutSink::new().with(LogSink);
    let mut writer_thread = None;
    if let Some(path) = &config.output.results_path {
        let (writer, handle) = spawn_record_writer(path)?;
        sinks = sinks.with(writer);
        writer_thread = Some(handle);
        info!("✅ Results file: {}", path);
    }

    let source = DirectoryCaptureSource::new(&config.scanner.source_dir);
    let settings = PipelineSettings::from_config(&config, once);
    let mut handle = ScanPipeline::new(analyzer, settings).spawn(source, sinks);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = handle.wait() => {
            info!("📭 Queue drained");
        }
    }

    let report = handle.shutdown().await;
    info!(
        "👋 SwarmScan stopped: discovered={} completed={} failed={}",
        report.producer.discovered, report.consumer.completed, report.consumer.failed
    );
    if report.producer.dropped > 0 {
        warn!("⚠️  {} candidates dropped by queue overflow policy", report.producer.dropped);
    }

    // the pipeline dropped the last writer sink; wait for the tail to hit disk
    if let Some(thread) = writer_thread {
        if thread.join().is_err() {
            error!("❌ Results writer thread panicked");
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(dir) = &cli.source_dir {
        config.scanner.source_dir = dir.clone();
    }
    if let Some(detailed) = cli.detailed_volume {
        config.pipeline.detailed_volume = detailed;
    }
    if let Some(capacity) = cli.queue_capacity {
        config.pipeline.queue_capacity = Some(capacity);
    }
}

fn init_logging(monitoring: &MonitoringConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&monitoring.log_level));

    let builder = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if monitoring.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_stuck_blocking_work_does_not_hold_the_process() {
        let started = Instant::now();
        let result = block_on_bounded(
            async {
                let _stuck = tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(3)));
                Ok(())
            },
            Duration::from_millis(50),
        );

        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    }
}
