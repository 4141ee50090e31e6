//! Throttling buffer: batches items and flushes on count or age.
//!
//! Items accumulate until either the buffer reaches its size threshold
//! (flushed inline on the caller) or the oldest pending item reaches the
//! timeout (flushed by a background waiter). The waiter is woken through
//! a single-slot channel, so any number of puts during one timeout window
//! collapse into one deferred flush.

use std::mem;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

struct Inner<T> {
    buffer: Mutex<Vec<T>>,
    max: usize,
    flush: Box<dyn Fn(Vec<T>) + Send + Sync>,
    wake: mpsc::Sender<()>,
}

impl<T> Inner<T> {
    fn flush_now(&self) {
        let batch = mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "Flushing throttled batch");
        (self.flush)(batch);
    }
}

/// Size- and age-bounded batching buffer. Cheap to clone.
pub struct Throttle<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Clone for Throttle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Throttle<T> {
    /// Creates a throttle flushing at `max` items or after `timeout`,
    /// whichever comes first. Spawns the background waiter; it exits when
    /// the last handle is dropped.
    pub fn new<F>(max: usize, timeout: Duration, flush: F) -> Self
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let inner = Arc::new(Inner {
            buffer: Mutex::new(Vec::new()),
            max: max.max(1),
            flush: Box::new(flush),
            wake: wake_tx,
        });
        tokio::spawn(waiter(Arc::downgrade(&inner), wake_rx, timeout));
        Self { inner }
    }

    /// Adds one item. Flushes inline when the buffer reaches the size
    /// threshold, otherwise arms the age-based flush.
    pub fn put(&self, item: T) {
        let full = {
            let mut buffer = self.inner.buffer.lock();
            buffer.push(item);
            buffer.len() >= self.inner.max
        };
        if full {
            self.inner.flush_now();
        } else {
            // Lossy: a wake already pending covers this item too.
            let _ = self.inner.wake.try_send(());
        }
    }

    /// Flushes whatever is buffered, if anything.
    pub fn flush(&self) {
        self.inner.flush_now();
    }

    /// Number of items currently buffered.
    pub fn pending(&self) -> usize {
        self.inner.buffer.lock().len()
    }
}

async fn waiter<T: Send + 'static>(
    inner: Weak<Inner<T>>,
    mut wake: mpsc::Receiver<()>,
    timeout: Duration,
) {
    while wake.recv().await.is_some() {
        tokio::time::sleep(timeout).await;
        match inner.upgrade() {
            Some(inner) => inner.flush_now(),
            None => break,
        }
    }
}
