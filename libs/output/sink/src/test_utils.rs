//! Reusable senders for exercising outputs without a backend.

use crate::{Batch, Record, Sender, SinkError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// A sender that records every batch it is given
#[derive(Debug)]
pub struct CollectingSender {
    name: String,
    batches: Mutex<Vec<Batch>>,
    delivered: Notify,
    closed: AtomicBool,
}

impl CollectingSender {
    pub fn new() -> Self {
        Self::with_name("test-collector")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batches: Mutex::new(Vec::new()),
            delivered: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Every batch received, in arrival order
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// All received records flattened across batches
    pub fn records(&self) -> Vec<Record> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.records().iter().cloned())
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.batches.lock().iter().map(Batch::len).sum()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until at least `count` records have been received
    pub async fn wait_for_records(&self, count: usize) {
        loop {
            let notified = self.delivered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.record_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CollectingSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sender for CollectingSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        self.batches.lock().push(batch.clone());
        self.delivered.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// A sender whose every send fails
#[derive(Debug)]
pub struct FailingSender {
    error: SinkError,
    attempts: AtomicUsize,
}

impl FailingSender {
    /// Fails with a refused connection
    pub fn new() -> Self {
        Self::with_error(SinkError::connection_failed("connection refused"))
    }

    pub fn with_error(error: SinkError) -> Self {
        Self {
            error,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of send calls so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for FailingSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sender for FailingSender {
    fn name(&self) -> &str {
        "test-failing"
    }

    async fn send(&self, _batch: &Batch) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// A sender that sleeps before handing the batch to a [`CollectingSender`]
#[derive(Debug)]
pub struct SlowSender {
    delay: Duration,
    started: AtomicUsize,
    inner: CollectingSender,
}

impl SlowSender {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicUsize::new(0),
            inner: CollectingSender::with_name("test-slow"),
        }
    }

    /// Sends that have begun, finished or not
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Batches that made it through the delay
    pub fn inner(&self) -> &CollectingSender {
        &self.inner
    }
}

#[async_trait]
impl Sender for SlowSender {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.send(batch).await
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.inner.close().await
    }
}
