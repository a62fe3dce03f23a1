//! 📸 Capture producer
//!
//! Polls a [`CaptureSource`] for new candidates, captures each one with
//! bounded retries, and hands the encoded screenshot to the scan queue. It
//! never waits on analysis, only on the queue when a bounded queue is full
//! under the `Block` policy.

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::queue::{EnqueueOutcome, QueueSender};
use super::shutdown::Shutdown;
use crate::capture::SeenLedger;
use crate::config::ScannerConfig;
use crate::error::CaptureError;
use crate::types::{Candidate, QueueItem, RawImage};

/// The page-navigation side: finds candidates and renders their charts
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Candidates currently listed, in listing order
    async fn discover(&self) -> Result<Vec<Candidate>>;

    /// One encoded, complete screenshot of the candidate's chart
    async fn capture(&self, candidate: &Candidate) -> Result<RawImage, CaptureError>;
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub poll_interval: Duration,
    /// Attempts per candidate, at least one
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub capture_timeout: Duration,
    pub base_url: String,
    /// Single discovery pass, then close the queue
    pub run_once: bool,
    pub checkpoint_path: Option<PathBuf>,
}

impl ProducerSettings {
    pub fn from_config(config: &ScannerConfig, run_once: bool) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            capture_timeout: config.capture_timeout(),
            base_url: config.base_url.clone(),
            run_once,
            checkpoint_path: config.checkpoint_path.as_ref().map(PathBuf::from),
        }
    }
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self::from_config(&ScannerConfig::default(), false)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub discovered: u64,
    pub enqueued: u64,
    pub dropped: u64,
    pub capture_failures: u64,
}

enum PassEnd {
    Finished,
    Stop,
}

pub struct CaptureProducer<C> {
    source: C,
    queue: QueueSender,
    settings: ProducerSettings,
    seen: Arc<SeenLedger>,
}

impl<C: CaptureSource> CaptureProducer<C> {
    /// `seen` must be settled by whoever emits the events for queued items,
    /// otherwise they are captured again after a restart
    pub fn new(source: C, queue: QueueSender, settings: ProducerSettings, seen: Arc<SeenLedger>) -> Self {
        Self {
            source,
            queue,
            settings,
            seen,
        }
    }

    /// Poll until shutdown, the consumer going away, or the end of a single
    /// pass in run-once mode. Dropping the producer closes the queue.
    pub async fn run(self, mut shutdown: Shutdown) -> ProducerReport {
        info!(
            "📸 Capture producer started (poll every {:?}, {} seen)",
            self.settings.poll_interval,
            self.seen.settled()
        );
        let mut report = ProducerReport::default();
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                _ = ticker.tick() => {}
            }

            let end = self.poll_once(&mut shutdown, &mut report).await;
            self.seen.persist();

            if matches!(end, PassEnd::Stop) || self.settings.run_once {
                break;
            }
        }

        info!(
            "📸 Capture producer stopped: discovered={} enqueued={} dropped={} capture_failures={}",
            report.discovered, report.enqueued, report.dropped, report.capture_failures
        );
        report
    }

    async fn poll_once(&self, shutdown: &mut Shutdown, report: &mut ProducerReport) -> PassEnd {
        let discovered = tokio::select! {
            biased;
            _ = shutdown.triggered() => return PassEnd::Stop,
            discovered = self.source.discover() => discovered,
        };
        let candidates = match discovered {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("❌ Candidate discovery failed: {:#}", e);
                return PassEnd::Finished;
            }
        };

        let fresh: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| !self.seen.is_known(&c.id))
            .collect();
        if fresh.is_empty() {
            debug!("🔎 No new candidates");
            return PassEnd::Finished;
        }
        info!("🔎 Discovered {} new candidates", fresh.len());

        for candidate in fresh {
            if shutdown.is_triggered() {
                return PassEnd::Stop;
            }
            if !self.seen.claim(&candidate.id) {
                continue;
            }
            report.discovered += 1;

            let candidate = if candidate.page_url.is_none() {
                candidate.with_page_url(&self.settings.base_url)
            } else {
                candidate
            };

            let captured = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    self.seen.release(&candidate.id);
                    return PassEnd::Stop;
                }
                captured = self.capture_with_retry(&candidate) => captured,
            };

            let image = match captured {
                Ok(image) => image,
                Err(e) => {
                    report.capture_failures += 1;
                    error!("❌ Giving up on {}: {}", candidate.id, e);
                    // not retried on later polls
                    self.seen.settle(&candidate.id);
                    continue;
                }
            };

            let item = QueueItem::new(candidate.id.clone(), image);
            let outcome = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    self.seen.release(&candidate.id);
                    return PassEnd::Stop;
                }
                outcome = self.queue.enqueue(item) => outcome,
            };

            match outcome {
                Ok(EnqueueOutcome::Queued) => {
                    report.enqueued += 1;
                    debug!("📬 Queued {} ({})", candidate.id, candidate.page_url.as_deref().unwrap_or("-"));
                }
                Ok(EnqueueOutcome::Dropped) => {
                    report.dropped += 1;
                    self.seen.release(&candidate.id);
                }
                Err(e) => {
                    self.seen.release(&candidate.id);
                    warn!("⚠️  {}, producer stopping", e);
                    return PassEnd::Stop;
                }
            }
        }

        PassEnd::Finished
    }

    async fn capture_with_retry(&self, candidate: &Candidate) -> Result<RawImage, CaptureError> {
        let attempts = self.settings.max_retries.max(1);
        let timeout_ms = self.settings.capture_timeout.as_millis() as u64;
        let mut last_err = CaptureError::Failed("no capture attempted".to_string());

        for attempt in 1..=attempts {
            let result = match tokio::time::timeout(self.settings.capture_timeout, self.source.capture(candidate)).await {
                Ok(Ok(image)) if image.is_empty() => Err(CaptureError::EmptyImage),
                Ok(result) => result,
                Err(_) => Err(CaptureError::Timeout(timeout_ms)),
            };

            match result {
                Ok(image) => return Ok(image),
                Err(e) => {
                    warn!("⚠️  Capture of {} failed (attempt {}/{}): {}", candidate.id, attempt, attempts, e);
                    last_err = e;
                }
            }

            if attempt < attempts {
                let jitter = rand::thread_rng().gen_range(0..=self.settings.retry_delay.as_millis() as u64 / 4);
                tokio::time::sleep(self.settings.retry_delay + Duration::from_millis(jitter)).await;
            }
        }

        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverflowPolicy;
    use crate::pipeline::queue::scan_queue;
    use crate::pipeline::shutdown::shutdown_channel;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSource {
        ids: Vec<&'static str>,
        failures_before_success: HashMap<&'static str, u32>,
        attempts: Mutex<HashMap<String, u32>>,
        discover_calls: AtomicU32,
        discover_delay: Duration,
    }

    #[async_trait]
    impl CaptureSource for FakeSource {
        async fn discover(&self) -> Result<Vec<Candidate>> {
            self.discover_calls.fetch_add(1, Ordering::SeqCst);
            if !self.discover_delay.is_zero() {
                tokio::time::sleep(self.discover_delay).await;
            }
            Ok(self.ids.iter().map(|id| Candidate::new(*id)).collect())
        }

        async fn capture(&self, candidate: &Candidate) -> Result<RawImage, CaptureError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let n = attempts.entry(candidate.id.clone()).or_insert(0);
                *n += 1;
                *n
            };
            let needed = self.failures_before_success.get(candidate.id.as_str()).copied().unwrap_or(0);
            if attempt <= needed {
                return Err(CaptureError::Failed("page not ready".to_string()));
            }
            Ok(RawImage::Bytes(candidate.id.as_bytes().to_vec()))
        }
    }

    fn settings() -> ProducerSettings {
        ProducerSettings {
            poll_interval: Duration::from_millis(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
            capture_timeout: Duration::from_millis(200),
            base_url: "https://pump.fun".to_string(),
            run_once: true,
            checkpoint_path: None,
        }
    }

    fn ledger() -> Arc<SeenLedger> {
        Arc::new(SeenLedger::in_memory())
    }

    #[tokio::test]
    async fn test_once_enqueues_in_listing_order_and_closes() {
        let source = FakeSource {
            ids: vec!["a", "b", "c"],
            ..Default::default()
        };
        let (tx, mut rx) = scan_queue(None, OverflowPolicy::Block);
        let (_trigger, shutdown) = shutdown_channel();

        let report = CaptureProducer::new(source, tx, settings(), ledger()).run(shutdown).await;
        assert_eq!(report.enqueued, 3);

        let mut ids = Vec::new();
        while let Some(item) = rx.recv().await {
            ids.push(item.candidate_id);
            rx.ack();
        }
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_retries_then_gives_up() {
        let source = FakeSource {
            ids: vec!["flaky", "dead"],
            failures_before_success: HashMap::from([("flaky", 2), ("dead", 10)]),
            ..Default::default()
        };
        let (tx, mut rx) = scan_queue(None, OverflowPolicy::Block);
        let (_trigger, shutdown) = shutdown_channel();
        let seen = ledger();

        let report = CaptureProducer::new(source, tx, settings(), seen.clone()).run(shutdown).await;
        assert_eq!(report.enqueued, 1);
        assert_eq!(report.capture_failures, 1);
        assert_eq!(rx.recv().await.unwrap().candidate_id, "flaky");
        assert!(rx.recv().await.is_none());

        // a given up capture is settled; the queued one waits for its event
        assert!(seen.is_settled("dead"));
        assert!(!seen.is_settled("flaky"));
    }

    #[tokio::test]
    async fn test_queued_candidates_are_skipped_across_polls() {
        let source = FakeSource {
            ids: vec!["a", "b"],
            ..Default::default()
        };
        let (tx, mut rx) = scan_queue(None, OverflowPolicy::Block);
        let (trigger, shutdown) = shutdown_channel();

        let producer = tokio::spawn(
            CaptureProducer::new(
                source,
                tx,
                ProducerSettings {
                    run_once: false,
                    ..settings()
                },
                ledger(),
            )
            .run(shutdown),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        trigger.trigger();
        let report = producer.await.unwrap();

        assert_eq!(report.discovered, 2);
        assert_eq!(report.enqueued, 2);
        let mut count = 0;
        while let Some(_item) = rx.recv().await {
            count += 1;
            rx.ack();
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_dropped_candidate_is_retried_on_next_poll() {
        let source = FakeSource {
            ids: vec!["a", "b"],
            ..Default::default()
        };
        let (tx, _rx) = scan_queue(Some(1), OverflowPolicy::DropNewest);
        let (trigger, shutdown) = shutdown_channel();
        let seen = ledger();

        let producer = tokio::spawn(
            CaptureProducer::new(
                source,
                tx,
                ProducerSettings {
                    run_once: false,
                    ..settings()
                },
                seen.clone(),
            )
            .run(shutdown),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        trigger.trigger();
        let report = producer.await.unwrap();

        assert_eq!(report.enqueued, 1);
        assert!(report.dropped >= 2, "report {:?}", report);
        assert!(!seen.is_settled("b"));
        assert_eq!(seen.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_slow_discovery() {
        let source = FakeSource {
            ids: vec!["a"],
            discover_delay: Duration::from_secs(5),
            ..Default::default()
        };
        let (tx, _rx) = scan_queue(None, OverflowPolicy::Block);
        let (trigger, shutdown) = shutdown_channel();

        let producer = tokio::spawn(CaptureProducer::new(source, tx, settings(), ledger()).run(shutdown));
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        let report = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should stop promptly")
            .unwrap();
        assert_eq!(report.discovered, 0);
    }

    #[tokio::test]
    async fn test_unsettled_candidates_come_back_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("seen.json");

        let (tx, _rx) = scan_queue(None, OverflowPolicy::Block);
        let (_trigger, shutdown) = shutdown_channel();
        let seen = Arc::new(SeenLedger::open(Some(checkpoint.clone())));
        let source = FakeSource {
            ids: vec!["a", "b"],
            ..Default::default()
        };
        let first = CaptureProducer::new(source, tx, settings(), seen.clone()).run(shutdown).await;
        assert_eq!(first.enqueued, 2);

        // only "a" got its event out before the process went away
        seen.settle("a");
        seen.persist();

        let (tx, mut rx) = scan_queue(None, OverflowPolicy::Block);
        let (_trigger, shutdown) = shutdown_channel();
        let source = FakeSource {
            ids: vec!["a", "b", "c"],
            ..Default::default()
        };
        let reopened = Arc::new(SeenLedger::open(Some(checkpoint)));
        let second = CaptureProducer::new(source, tx, settings(), reopened).run(shutdown).await;
        assert_eq!(second.discovered, 2);

        let mut ids = Vec::new();
        while let Some(item) = rx.recv().await {
            ids.push(item.candidate_id);
            rx.ack();
        }
        assert_eq!(ids, vec!["b", "c"]);
    }
}
