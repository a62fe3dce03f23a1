//! 📊 Stage latency histograms
//!
//! Tracks: decode → isolate → preprocess → detect → score, plus end-to-end
//! time from dequeue to publish. Owned by the consumer, reported on a timer
//! and once more at shutdown.

use std::time::Duration;
use tracing::{info, warn};

/// p99 above this is flagged
const SLOW_STAGE: Duration = Duration::from_millis(500);

/// Wall-clock time spent in each analysis stage of one item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub decode: Duration,
    pub isolate: Duration,
    pub preprocess: Duration,
    pub detect: Duration,
    pub score: Duration,
}

/// Simple histogram for latency tracking
pub struct LatencyHistogram {
    samples: Vec<Duration>,
    name: &'static str,
}

impl LatencyHistogram {
    pub fn new(name: &'static str) -> Self {
        Self {
            samples: Vec::with_capacity(1024),
            name,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank percentile, `p` in [0, 1]
    pub fn percentile(&mut self, p: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.samples.sort_unstable();
        let idx = ((self.samples.len() as f64 * p) as usize).min(self.samples.len() - 1);
        self.samples[idx]
    }

    /// Report statistics and clear
    pub fn report_and_clear(&mut self) {
        if self.samples.is_empty() {
            return;
        }

        let count = self.samples.len();
        let p50 = self.percentile(0.5);
        let p90 = self.percentile(0.9);
        let p99 = self.percentile(0.99);
        let max = self.samples[count - 1];

        info!(
            "📊 {} latency: count={} | p50={:.2}ms | p90={:.2}ms | p99={:.2}ms | max={:.2}ms",
            self.name,
            count,
            ms(p50),
            ms(p90),
            ms(p99),
            ms(max)
        );

        if p99 > SLOW_STAGE {
            warn!("⚠️  {} p99 latency is high: {:.2}ms", self.name, ms(p99));
        }

        self.samples.clear();
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

pub struct StageLatency {
    pub decode: LatencyHistogram,
    pub isolate: LatencyHistogram,
    pub preprocess: LatencyHistogram,
    pub detect: LatencyHistogram,
    pub score: LatencyHistogram,
    pub end_to_end: LatencyHistogram,
}

impl StageLatency {
    pub fn new() -> Self {
        Self {
            decode: LatencyHistogram::new("Decode"),
            isolate: LatencyHistogram::new("Isolate"),
            preprocess: LatencyHistogram::new("Preprocess"),
            detect: LatencyHistogram::new("Detect"),
            score: LatencyHistogram::new("Score"),
            end_to_end: LatencyHistogram::new("End-to-End"),
        }
    }

    /// Stages an item never reached (zero duration) are not recorded
    pub fn record(&mut self, timings: &StageTimings, end_to_end: Duration) {
        let stages = [
            (&mut self.decode, timings.decode),
            (&mut self.isolate, timings.isolate),
            (&mut self.preprocess, timings.preprocess),
            (&mut self.detect, timings.detect),
            (&mut self.score, timings.score),
        ];
        for (histogram, sample) in stages {
            if !sample.is_zero() {
                histogram.record(sample);
            }
        }
        self.end_to_end.record(end_to_end);
    }

    pub fn report_all(&mut self) {
        self.decode.report_and_clear();
        self.isolate.report_and_clear();
        self.preprocess.report_and_clear();
        self.detect.report_and_clear();
        self.score.report_and_clear();
        self.end_to_end.report_and_clear();
    }
}

impl Default for StageLatency {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        let mut h = LatencyHistogram::new("test");
        for ms in (1..=100).rev() {
            h.record(Duration::from_millis(ms));
        }
        assert_eq!(h.percentile(0.5), Duration::from_millis(51));
        assert_eq!(h.percentile(0.99), Duration::from_millis(100));
        assert_eq!(h.percentile(1.0), Duration::from_millis(100));
    }

    #[test]
    fn test_report_clears() {
        let mut h = LatencyHistogram::new("test");
        h.record(Duration::from_millis(3));
        h.report_and_clear();
        assert!(h.is_empty());
        assert_eq!(h.percentile(0.5), Duration::ZERO);
    }

    #[test]
    fn test_unreached_stages_are_skipped() {
        let mut latency = StageLatency::new();
        let timings = StageTimings {
            decode: Duration::from_millis(2),
            ..Default::default()
        };
        latency.record(&timings, Duration::from_millis(2));

        assert_eq!(latency.decode.len(), 1);
        assert!(latency.detect.is_empty());
        assert_eq!(latency.end_to_end.len(), 1);
    }
}
