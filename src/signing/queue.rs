use crate::rrset::RrsetKey;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("signing queue is closed")]
    Closed,
}

/// Bounded FIFO of RRsets awaiting signature computation.
///
/// Decouples diff production from signing consumption. Producers block when
/// the queue is full rather than dropping entries: a lost signing request
/// ships a stale or missing signature. `close` ends input; consumers drain
/// what is queued and then observe end-of-input.
pub struct SigningQueue {
    tx: Mutex<Option<mpsc::Sender<RrsetKey>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<RrsetKey>>,
    capacity: usize,
}

impl SigningQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue an RRset for signing, waiting while the queue is full
    pub async fn enqueue(&self, key: RrsetKey) -> Result<(), QueueError> {
        let tx = self.tx.lock().clone().ok_or(QueueError::Closed)?;
        tx.send(key).await.map_err(|_| QueueError::Closed)
    }

    /// Dequeue the next RRset; `None` once the queue is closed and drained.
    ///
    /// Single delivery: each enqueued RRset reaches exactly one worker.
    pub async fn dequeue(&self) -> Option<RrsetKey> {
        self.rx.lock().await.recv().await
    }

    /// Stop accepting input; blocked consumers wake with end-of-input once
    /// the remaining entries are drained.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}
