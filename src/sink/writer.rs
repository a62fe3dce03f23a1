//! 📝 Results writer - decoupled from the consumer
//!
//! Dedicated thread appending scan events to a JSON-lines file. The consumer
//! only does a non-blocking send; a full channel drops the event and counts it.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::AnalysisSink;
use crate::types::ScanEvent;

/// Maximum events written per flush
const BATCH_MAX_SIZE: usize = 256;

const CHANNEL_CAPACITY: usize = 4_096;

pub struct RecordWriter {
    path: PathBuf,
    out: BufWriter<File>,
    batch: Vec<ScanEvent>,
    written: u64,
}

impl RecordWriter {
    /// Open (or create) the results file for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create results directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open results file {:?}", path))?;

        Ok(Self {
            path,
            out: BufWriter::new(file),
            batch: Vec::with_capacity(BATCH_MAX_SIZE),
            written: 0,
        })
    }

    /// Writer loop; runs on its own thread until every sender is gone
    pub fn run_blocking(mut self, mut rx: mpsc::Receiver<ScanEvent>) {
        info!("📝 Results writer started ({:?})", self.path);

        while let Some(event) = rx.blocking_recv() {
            self.batch.push(event);

            // drain whatever else is already waiting
            while self.batch.len() < BATCH_MAX_SIZE {
                match rx.try_recv() {
                    Ok(event) => self.batch.push(event),
                    Err(_) => break,
                }
            }

            if let Err(e) = self.flush() {
                warn!("❌ Results flush failed: {:#}", e);
            }
        }

        info!("📝 Results writer closed after {} events", self.written);
    }

    fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let count = self.batch.len();

        for event in self.batch.drain(..) {
            serde_json::to_writer(&mut self.out, &event).context("Failed to serialize scan event")?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush().context("Failed to flush results file")?;
        self.written += count as u64;

        debug!("💾 Results flush: {} events in {:?}", count, start.elapsed());
        Ok(())
    }
}

/// Sending half handed to the consumer
#[derive(Clone)]
pub struct WriterSink {
    tx: mpsc::Sender<ScanEvent>,
    dropped: Arc<AtomicU64>,
}

impl WriterSink {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AnalysisSink for WriterSink {
    fn emit(&self, event: ScanEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "⚠️  Results writer backlogged, dropped event for {} (total dropped: {})",
                    event.candidate_id(),
                    dropped
                );
            }
            Err(TrySendError::Closed(event)) => {
                warn!("⚠️  Results writer gone, event for {} not written", event.candidate_id());
            }
        }
    }
}

/// Open the results file and start the writer thread.
///
/// The thread exits once every `WriterSink` clone has been dropped; join the
/// handle to be sure the tail of the file is on disk.
pub fn spawn_record_writer(path: impl AsRef<Path>) -> Result<(WriterSink, JoinHandle<()>)> {
    let writer = RecordWriter::open(path)?;
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let handle = std::thread::Builder::new()
        .name("results-writer".to_string())
        .spawn(move || writer.run_blocking(rx))
        .context("Failed to spawn results writer thread")?;

    info!("✅ Results writer channel created (capacity={})", CHANNEL_CAPACITY);
    Ok((
        WriterSink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        handle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureEvent, Stage};
    use tempfile::tempdir;

    fn failure(id: &str) -> ScanEvent {
        ScanEvent::Failed(FailureEvent {
            candidate_id: id.to_string(),
            stage: Stage::Decoding,
            reason: "image payload is empty".to_string(),
        })
    }

    #[test]
    fn test_writer_appends_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("results.jsonl");

        let (sink, handle) = spawn_record_writer(&path).unwrap();
        sink.emit(failure("a"));
        sink.emit(failure("b"));
        drop(sink);
        handle.join().unwrap();

        let (sink, handle) = spawn_record_writer(&path).unwrap();
        sink.emit(failure("c"));
        drop(sink);
        handle.join().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let events: Vec<ScanEvent> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let ids: Vec<&str> = events.iter().map(|e| e.candidate_id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(contents.lines().all(|line| line.contains("\"event\":\"failed\"")));
    }
}
