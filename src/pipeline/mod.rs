//! 🔄 Scan pipeline: capture producer → scan queue → analysis consumer
//!
//! Two tasks share the queue and the seen-ledger. The producer owns the
//! sending half and closes it when it stops; the consumer drains until the
//! queue is closed and empty, or until shutdown. A candidate is settled in the
//! ledger when its event reaches the sink, so anything abandoned at shutdown
//! is captured again on the next start.

pub mod consumer;
pub mod producer;
pub mod queue;
pub mod shutdown;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::analyzer::ChartAnalyzer;
use crate::capture::SeenLedger;
use crate::config::{Config, OverflowPolicy};
use crate::sink::AnalysisSink;
use crate::types::ScanEvent;

pub use consumer::{AnalysisConsumer, ConsumerReport};
pub use producer::{CaptureProducer, CaptureSource, ProducerReport, ProducerSettings};
pub use queue::{scan_queue, EnqueueOutcome, QueueReceiver, QueueSender, QueueStats};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub producer: ProducerSettings,
    /// `None` means unbounded
    pub queue_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
    pub shutdown_timeout: Duration,
    pub latency_report_interval: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config, run_once: bool) -> Self {
        Self {
            producer: ProducerSettings::from_config(&config.scanner, run_once),
            queue_capacity: config.pipeline.queue_capacity,
            overflow: config.pipeline.overflow,
            shutdown_timeout: config.pipeline.shutdown_timeout(),
            latency_report_interval: config.pipeline.latency_report_interval(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default(), false)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub producer: ProducerReport,
    pub consumer: ConsumerReport,
}

/// Settles each candidate once its event has been handed to the sink
struct Settling<S> {
    inner: S,
    seen: Arc<SeenLedger>,
}

impl<S: AnalysisSink> AnalysisSink for Settling<S> {
    fn emit(&self, event: ScanEvent) {
        let candidate_id = event.candidate_id().to_string();
        self.inner.emit(event);
        self.seen.settle(&candidate_id);
    }
}

pub struct ScanPipeline {
    analyzer: Arc<ChartAnalyzer>,
    settings: PipelineSettings,
}

impl ScanPipeline {
    pub fn new(analyzer: Arc<ChartAnalyzer>, settings: PipelineSettings) -> Self {
        Self { analyzer, settings }
    }

    /// Start the producer and consumer tasks on the current runtime
    pub fn spawn<C, S>(self, source: C, sink: S) -> PipelineHandle
    where
        C: CaptureSource + 'static,
        S: AnalysisSink + 'static,
    {
        let (tx, rx) = scan_queue(self.settings.queue_capacity, self.settings.overflow);
        let (trigger, shutdown) = shutdown_channel();
        let stats = tx.stats();
        let seen = Arc::new(SeenLedger::open(self.settings.producer.checkpoint_path.clone()));

        info!(
            "🚀 Scan pipeline starting (queue={}, overflow={:?}, detectors={:?})",
            self.settings
                .queue_capacity
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
            self.settings.overflow,
            self.analyzer.registry().names()
        );

        let sink = Settling {
            inner: sink,
            seen: seen.clone(),
        };
        let consumer = AnalysisConsumer::new(self.analyzer, sink)
            .with_shutdown_timeout(self.settings.shutdown_timeout)
            .with_latency_report_interval(self.settings.latency_report_interval);
        let consumer = tokio::spawn(consumer.run(rx, trigger.subscribe()));

        let producer = CaptureProducer::new(source, tx, self.settings.producer, seen.clone());
        let producer = tokio::spawn(producer.run(shutdown));

        PipelineHandle {
            trigger,
            stats,
            seen,
            producer,
            consumer,
            consumer_done: None,
        }
    }
}

pub struct PipelineHandle {
    trigger: ShutdownTrigger,
    stats: Arc<QueueStats>,
    seen: Arc<SeenLedger>,
    producer: JoinHandle<ProducerReport>,
    consumer: JoinHandle<ConsumerReport>,
    consumer_done: Option<ConsumerReport>,
}

impl PipelineHandle {
    pub fn stats(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }

    /// Resolves when the consumer has drained a closed queue (run-once mode,
    /// or the producer stopped on its own). Cancel-safe.
    pub async fn wait(&mut self) {
        if self.consumer_done.is_some() {
            return;
        }
        let report = match (&mut self.consumer).await {
            Ok(report) => report,
            Err(e) => {
                error!("❌ Analysis consumer task failed: {}", e);
                ConsumerReport::default()
            }
        };
        self.consumer_done = Some(report);
    }

    /// Request shutdown and wait for both tasks to finish
    pub async fn shutdown(mut self) -> PipelineReport {
        self.trigger.trigger();

        let producer = match (&mut self.producer).await {
            Ok(report) => report,
            Err(e) => {
                error!("❌ Capture producer task failed: {}", e);
                ProducerReport::default()
            }
        };
        self.wait().await;
        self.seen.persist();

        let report = PipelineReport {
            producer,
            consumer: self.consumer_done.unwrap_or_default(),
        };
        info!(
            "🏁 Scan pipeline stopped: enqueued={} completed={} failed={} aborted={} abandoned={}",
            report.producer.enqueued,
            report.consumer.completed,
            report.consumer.failed,
            report.consumer.aborted,
            report.consumer.abandoned
        );
        report
    }
}
