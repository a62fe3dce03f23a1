//! 📬 Scan queue between the capture producer and the analysis consumer
//!
//! FIFO, single consumer. Unbounded by default; when bounded, the overflow
//! policy decides whether the producer waits or the new item is dropped.
//! Every item handed to the consumer must be acknowledged with
//! [`QueueReceiver::ack`]; [`QueueStats::wait_idle`] resolves once every
//! accepted item has been acknowledged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::OverflowPolicy;
use crate::error::QueueClosed;
use crate::types::QueueItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Bounded queue was full under `DropNewest`
    Dropped,
}

#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    acknowledged: AtomicU64,
    idle: Notify,
}

impl QueueStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::SeqCst)
    }

    /// Accepted but not yet acknowledged
    pub fn pending(&self) -> u64 {
        let acked = self.acknowledged();
        self.enqueued().saturating_sub(acked)
    }

    /// Resolves once every accepted item has been acknowledged
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn retract(&self) {
        self.enqueued.fetch_sub(1, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}

/// Counts an item as accepted; uncounted again unless committed, including
/// when the enqueue future is cancelled mid-wait
struct Accepted<'a> {
    stats: &'a QueueStats,
    committed: bool,
}

impl<'a> Accepted<'a> {
    fn new(stats: &'a QueueStats) -> Self {
        stats.enqueued.fetch_add(1, Ordering::SeqCst);
        Self { stats, committed: false }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Accepted<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.stats.retract();
        }
    }
}

enum Tx {
    Bounded(mpsc::Sender<QueueItem>),
    Unbounded(mpsc::UnboundedSender<QueueItem>),
}

enum Rx {
    Bounded(mpsc::Receiver<QueueItem>),
    Unbounded(mpsc::UnboundedReceiver<QueueItem>),
}

/// Producer half. Not cloneable: the queue has exactly one producer.
pub struct QueueSender {
    tx: Tx,
    overflow: OverflowPolicy,
    stats: Arc<QueueStats>,
}

/// Consumer half
pub struct QueueReceiver {
    rx: Rx,
    stats: Arc<QueueStats>,
}

/// Create a queue; `None` capacity means unbounded
pub fn scan_queue(capacity: Option<usize>, overflow: OverflowPolicy) -> (QueueSender, QueueReceiver) {
    let stats = Arc::new(QueueStats::default());
    let (tx, rx) = match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (Tx::Bounded(tx), Rx::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Tx::Unbounded(tx), Rx::Unbounded(rx))
        }
    };
    (
        QueueSender {
            tx,
            overflow,
            stats: stats.clone(),
        },
        QueueReceiver { rx, stats },
    )
}

impl QueueSender {
    /// Hand an item to the consumer. Ownership moves into the queue.
    ///
    /// Under `Block` a full bounded queue suspends the caller until there is
    /// room; under `DropNewest` the item is discarded and counted.
    pub async fn enqueue(&self, item: QueueItem) -> Result<EnqueueOutcome, QueueClosed> {
        // counted before the send so an ack can never overtake it
        let accepted = Accepted::new(&self.stats);

        match (&self.tx, self.overflow) {
            (Tx::Unbounded(tx), _) => tx.send(item).map_err(|_| QueueClosed)?,
            (Tx::Bounded(tx), OverflowPolicy::Block) => tx.send(item).await.map_err(|_| QueueClosed)?,
            (Tx::Bounded(tx), OverflowPolicy::DropNewest) => match tx.try_send(item) {
                Ok(()) => {}
                Err(TrySendError::Full(item)) => {
                    let dropped = self.stats.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!("⚠️  Scan queue full, dropped {} (total dropped: {})", item.candidate_id, dropped);
                    return Ok(EnqueueOutcome::Dropped);
                }
                Err(TrySendError::Closed(_)) => return Err(QueueClosed),
            },
        }

        accepted.commit();
        Ok(EnqueueOutcome::Queued)
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }

    /// Wait until every item accepted so far has been acknowledged
    pub async fn join(&self) {
        self.stats.wait_idle().await
    }
}

impl QueueReceiver {
    pub async fn recv(&mut self) -> Option<QueueItem> {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Option<QueueItem> {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.try_recv().ok(),
            Rx::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Mark one received item as done
    pub fn ack(&self) {
        self.stats.acknowledged.fetch_add(1, Ordering::SeqCst);
        self.stats.idle.notify_waiters();
    }

    /// Refuse further items; already queued ones stay receivable
    pub fn close(&mut self) {
        debug!("📬 Scan queue closed");
        match &mut self.rx {
            Rx::Bounded(rx) => rx.close(),
            Rx::Unbounded(rx) => rx.close(),
        }
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }
}
