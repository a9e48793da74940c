//! Bounded dispatch queue between the scanner and the workers.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use super::cancel::CancelHandle;
use crate::metrics;
use crate::task::Task;

/// A claimed task travelling to a worker.
#[derive(Debug)]
pub(crate) struct DispatchItem {
    pub task: Task,
    pub cancel: CancelHandle,
}

/// Multi-consumer FIFO of claimed tasks.
///
/// Workers take turns on the receiver, so whichever worker is idle first
/// gets the head of the queue.
#[derive(Clone)]
pub(crate) struct DispatchQueue {
    tx: mpsc::Sender<DispatchItem>,
    rx: Arc<Mutex<mpsc::Receiver<DispatchItem>>>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Push without waiting. A full queue hands the item back.
    pub fn try_push(&self, item: DispatchItem) -> Result<(), DispatchItem> {
        let result = self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(item) | mpsc::error::TrySendError::Closed(item) => {
                item
            }
        });
        metrics::DISPATCH_QUEUE_DEPTH.set(self.len() as i64);
        result
    }

    /// Wait for the next item. Cancel safe.
    pub async fn recv(&self) -> Option<DispatchItem> {
        let item = self.rx.lock().await.recv().await;
        metrics::DISPATCH_QUEUE_DEPTH.set(self.len() as i64);
        item
    }

    /// Remove everything currently queued.
    pub async fn drain(&self) -> Vec<DispatchItem> {
        let mut rx = self.rx.lock().await;
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        metrics::DISPATCH_QUEUE_DEPTH.set(0);
        items
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
