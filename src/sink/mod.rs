//! 📤 Result sinks
//!
//! The consumer emits exactly one [`ScanEvent`] per dequeued item, in queue
//! order. Sinks must not block: anything slow goes through its own thread
//! or channel (see [`writer`]).

pub mod writer;

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::ScanEvent;

pub use writer::{spawn_record_writer, RecordWriter, WriterSink};

pub trait AnalysisSink: Send + Sync {
    fn emit(&self, event: ScanEvent);
}

impl<T: AnalysisSink + ?Sized> AnalysisSink for Arc<T> {
    fn emit(&self, event: ScanEvent) {
        (**self).emit(event)
    }
}

impl<T: AnalysisSink + ?Sized> AnalysisSink for Box<T> {
    fn emit(&self, event: ScanEvent) {
        (**self).emit(event)
    }
}

/// Operator-facing log line per event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AnalysisSink for LogSink {
    fn emit(&self, event: ScanEvent) {
        match event {
            ScanEvent::Completed(record) => {
                let trend = record
                    .price_patterns()
                    .map(|p| format!("{:?}", p.trend))
                    .unwrap_or_else(|| "-".to_string());
                let volume = record
                    .volume_profile()
                    .map(|v| format!("{:?}", v.distribution))
                    .unwrap_or_else(|| "-".to_string());
                info!(
                    "🎯 {} | confidence={:.2} | trend={} | volume={}",
                    record.candidate_id(),
                    record.confidence(),
                    trend,
                    volume
                );
            }
            ScanEvent::Failed(failure) => {
                warn!(
                    "🚫 {} | failed during {}: {}",
                    failure.candidate_id, failure.stage, failure.reason
                );
            }
        }
    }
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AnalysisSink for ChannelSink {
    fn emit(&self, event: ScanEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

/// Sends every event to each inner sink, in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn AnalysisSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl AnalysisSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AnalysisSink for FanoutSink {
    fn emit(&self, event: ScanEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}
