//! 🔬 Analysis consumer
//!
//! Takes one item at a time off the scan queue and runs the analysis on the
//! blocking pool, so the runtime (and the producer on it) keeps moving. Each
//! dequeued item produces exactly one event, completed or failed, and is
//! acknowledged afterwards. An item-level failure never stops the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::queue::QueueReceiver;
use super::shutdown::Shutdown;
use crate::analyzer::{ChartAnalyzer, StageProgress};
use crate::latency::StageLatency;
use crate::sink::AnalysisSink;
use crate::types::{FailureEvent, QueueItem, ScanEvent};

/// Counts of what the consumer did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub completed: u64,
    pub failed: u64,
    /// In flight when the shutdown timeout ran out
    pub aborted: u64,
    /// Still queued at shutdown, never analyzed
    pub abandoned: u64,
}

enum Processed {
    Completed,
    Failed,
    Aborted,
}

pub struct AnalysisConsumer<S> {
    analyzer: Arc<ChartAnalyzer>,
    sink: S,
    shutdown_timeout: Duration,
    latency_report_interval: Duration,
}

impl<S: AnalysisSink + 'static> AnalysisConsumer<S> {
    pub fn new(analyzer: Arc<ChartAnalyzer>, sink: S) -> Self {
        Self {
            analyzer,
            sink,
            shutdown_timeout: Duration::from_secs(5),
            latency_report_interval: Duration::from_secs(30),
        }
    }

    /// How long an in-flight item may keep running once shutdown is requested
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_latency_report_interval(mut self, every: Duration) -> Self {
        self.latency_report_interval = every.max(Duration::from_millis(1));
        self
    }

    /// Consume until the queue is closed and drained, or shutdown is requested
    pub async fn run(self, mut queue: QueueReceiver, mut shutdown: Shutdown) -> ConsumerReport {
        info!("🔬 Analysis consumer started");
        let mut report = ConsumerReport::default();
        let mut latency = StageLatency::new();
        let mut report_timer = interval(self.latency_report_interval);
        report_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        report_timer.tick().await;

        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!("🛑 Consumer stopping on shutdown request");
                    break;
                }
                _ = report_timer.tick() => {
                    latency.report_all();
                    continue;
                }
                next = queue.recv() => match next {
                    Some(item) => item,
                    None => {
                        info!("📭 Scan queue closed and drained");
                        break;
                    }
                },
            };

            match self.process(item, &mut shutdown, &mut latency).await {
                Processed::Completed => report.completed += 1,
                Processed::Failed => report.failed += 1,
                Processed::Aborted => report.aborted += 1,
            }
            queue.ack();

            if shutdown.is_triggered() {
                info!("🛑 Consumer stopping on shutdown request");
                break;
            }
        }

        queue.close();
        while let Some(item) = queue.try_recv() {
            debug!("🗑️  Abandoning queued item {}", item.candidate_id);
            report.abandoned += 1;
            queue.ack();
        }
        if report.abandoned > 0 {
            warn!("⚠️  {} queued items abandoned at shutdown", report.abandoned);
        }

        latency.report_all();
        info!(
            "🔬 Analysis consumer stopped: completed={} failed={} aborted={} abandoned={}",
            report.completed, report.failed, report.aborted, report.abandoned
        );
        report
    }

    async fn process(&self, item: QueueItem, shutdown: &mut Shutdown, latency: &mut StageLatency) -> Processed {
        let candidate_id = item.candidate_id.clone();
        let progress = StageProgress::new();
        let started = Instant::now();

        let analyzer = self.analyzer.clone();
        let task_progress = progress.clone();
        let mut task = tokio::task::spawn_blocking(move || analyzer.analyze(&item, &task_progress));

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = shutdown.triggered() => {
                info!(
                    "🛑 Shutdown requested while analyzing {}, allowing {:?} to finish",
                    candidate_id, self.shutdown_timeout
                );
                match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        // the blocking thread cannot be interrupted; its result is discarded
                        task.abort();
                        let stage = progress.get();
                        warn!("⏱️  {} aborted during {} at shutdown", candidate_id, stage);
                        self.sink.emit(ScanEvent::Failed(FailureEvent {
                            candidate_id,
                            stage,
                            reason: "aborted: shutdown timeout elapsed".to_string(),
                        }));
                        return Processed::Aborted;
                    }
                }
            }
        };

        match joined {
            Ok((Ok(record), timings)) => {
                latency.record(&timings, started.elapsed());
                info!(
                    "✅ {} analyzed: confidence={:.2} ({:.0}ms)",
                    candidate_id,
                    record.confidence(),
                    started.elapsed().as_secs_f64() * 1000.0
                );
                self.sink.emit(ScanEvent::Completed(record));
                Processed::Completed
            }
            Ok((Err(failure), timings)) => {
                latency.record(&timings, started.elapsed());
                warn!("❌ {} failed during {}: {}", candidate_id, failure.stage, failure.reason);
                self.sink.emit(ScanEvent::Failed(FailureEvent {
                    candidate_id,
                    stage: failure.stage,
                    reason: failure.reason,
                }));
                Processed::Failed
            }
            Err(e) => {
                let stage = progress.get();
                error!("❌ Analysis of {} crashed during {}: {}", candidate_id, stage, e);
                self.sink.emit(ScanEvent::Failed(FailureEvent {
                    candidate_id,
                    stage,
                    reason: format!("analysis crashed: {}", e),
                }));
                Processed::Failed
            }
        }
    }
}
