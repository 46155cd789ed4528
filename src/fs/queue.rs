use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Upload queue is already finished")]
pub struct QueueFinished;

/// Bounded queue between the crawler and the uploaders.
///
/// Producers block while the queue is full. Consumers share one receiver, so
/// every item is delivered to exactly one of them. `finish` closes the queue;
/// consumers drain what is left and then get `None`.
pub struct UploadQueue<T> {
    sender: Mutex<Option<mpsc::Sender<T>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<T>>,
    pending: AtomicUsize,
    finished: AtomicBool,
}

impl<T: Send> UploadQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            pending: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<T>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Enqueue an item, waiting while the queue is full.
    pub async fn add(&self, item: T) -> Result<(), QueueFinished> {
        let sender = self.sender().ok_or(QueueFinished)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(item).await.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueFinished);
        }
        Ok(())
    }

    /// `add` for producers running outside the async runtime.
    pub fn blocking_add(&self, item: T) -> Result<(), QueueFinished> {
        let sender = self.sender().ok_or(QueueFinished)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.blocking_send(item).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueFinished);
        }
        Ok(())
    }

    /// Next item, waiting while the queue is empty but not finished.
    /// `None` once the queue is finished and drained.
    pub async fn remove(&self) -> Option<T> {
        let item = self.receiver.lock().await.recv().await;
        if item.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// No more items will be added.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Finish and discard buffered items. Producers waiting for room are
    /// released with `QueueFinished`.
    pub async fn close(&self) {
        self.finish();
        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while receiver.try_recv().is_ok() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Finished and every added item has been removed.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst) && self.pending.load(Ordering::SeqCst) == 0
    }

    /// Items added but not yet removed.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
