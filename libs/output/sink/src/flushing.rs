//! Timer-driven flushing around a [`BatchingSink`].
//!
//! Two background tasks run per output:
//!
//! - the **ticker** drains the buffer once per `flush_interval` and pushes the
//!   batch onto a bounded pending queue; it never waits for a send
//! - the **dispatcher** pops batches and hands each to the [`Sender`] under
//!   the I/O timeout, with at most `max_in_flight` sends outstanding
//!
//! When the queue is full the oldest pending batch is evicted and reported
//! through the error handlers as [`SinkError::BatchDropped`]. A shutdown that
//! outlasts its grace period reports every batch still queued or in flight
//! as [`SinkError::Abandoned`] and starts no further sends.
//!
//! ```text
//! accept ──► BatchingSink ──tick──► PendingQueue ──► dispatcher ──► Sender
//!                                        │ full                  │ Err
//!                                        ▼                       ▼
//!                                  ErrorHandlers ◄───────────────┘
//! ```

use crate::handler::panic_message;
use crate::{
    Batch, BatchingSink, ConfigError, ErrorHandlers, MetricsSnapshot, Record, SendContext,
    SendFailure, SendOutcome, Sender, Sink, SinkConfig, SinkError, SinkMetrics,
};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

struct QueueState {
    batches: VecDeque<Batch>,
    closed: bool,
}

/// Bounded queue of batches waiting for the dispatcher
struct PendingQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl PendingQueue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                batches: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue a batch, evicting the oldest one when full
    ///
    /// Returns `Err` with the batch if the queue no longer accepts work.
    fn push(&self, batch: Batch) -> Result<Option<Batch>, Batch> {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(batch);
            }
            let evicted = if state.batches.len() >= self.capacity {
                state.batches.pop_front()
            } else {
                None
            };
            state.batches.push_back(batch);
            evicted
        };
        self.notify.notify_one();
        Ok(evicted)
    }

    /// Next batch in drain order; `None` once closed and empty
    async fn pop(&self) -> Option<Batch> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(batch) = state.batches.pop_front() {
                    return Some(batch);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    /// Remove every waiting batch
    fn take_all(&self) -> Vec<Batch> {
        self.state.lock().batches.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.state.lock().batches.len()
    }
}

/// Sends that have begun, keyed by batch sequence
#[derive(Default)]
struct InFlight {
    abandoned: bool,
    sends: HashMap<u64, usize>,
}

/// State shared between the handle and its background tasks
struct Shared {
    config: SinkConfig,
    buffer: BatchingSink,
    sender: Arc<dyn Sender>,
    handlers: ErrorHandlers,
    metrics: SinkMetrics,
    queue: PendingQueue,
    in_flight: Mutex<InFlight>,
}

impl Shared {
    /// Drain the buffer and queue the batch; empty batches are elided
    fn flush(&self) -> Option<u64> {
        let batch = self.buffer.drain();
        if batch.is_empty() {
            return None;
        }

        let sequence = batch.sequence();
        self.metrics.record_flush();
        tracing::debug!(
            sink = %self.config.id,
            sequence,
            records = batch.len(),
            "Flushing batch"
        );

        match self.queue.push(batch) {
            Ok(None) => {}
            Ok(Some(evicted)) => self.report_drop(evicted),
            Err(rejected) => {
                self.metrics.record_failure(rejected.len(), false);
                self.report(&rejected, SinkError::Closed);
            }
        }
        Some(sequence)
    }

    /// Hand one batch to the sender, bounded by the I/O timeout
    ///
    /// A panicking sender counts as a failed send. A batch that shutdown has
    /// already given up on is never handed over.
    async fn deliver(&self, batch: Batch) -> SendOutcome {
        let context = batch.context(&self.config.id);
        if !self.begin_send(&batch) {
            return SendOutcome::Failed(self.report_abandoned(context, false));
        }

        let started = Instant::now();
        let io_timeout = self.config.io_timeout;
        let send = AssertUnwindSafe(self.sender.send(&batch)).catch_unwind();

        let result = match tokio::time::timeout(io_timeout, send).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(SinkError::send_failed(
                format!("sender panicked: {}", panic_message(panic.as_ref())),
                context.clone(),
            )),
            Err(_) => Err(SinkError::timeout(io_timeout)),
        };

        if !self.finish_send(batch.sequence()) {
            tracing::debug!(
                sink = %self.config.id,
                sequence = batch.sequence(),
                "Abandoned send finished after shutdown"
            );
            let error = SinkError::abandoned(context.clone(), self.config.shutdown_grace);
            return SendOutcome::Failed(SendFailure::from_context(context, error));
        }

        match result {
            Ok(()) => {
                self.metrics.record_delivery(batch.len(), started.elapsed());
                tracing::debug!(
                    sink = %self.config.id,
                    sequence = batch.sequence(),
                    records = batch.len(),
                    "Batch delivered"
                );
                SendOutcome::Delivered {
                    sequence: batch.sequence(),
                    records: batch.len(),
                }
            }
            Err(error) => {
                let failed = error.undelivered(batch.len());
                if failed < batch.len() {
                    self.metrics.record_partial_delivery(batch.len() - failed);
                }
                self.metrics.record_failure(failed, error.is_timeout());
                SendOutcome::Failed(self.report(&batch, error))
            }
        }
    }

    /// Register a send about to start; false once shutdown has given up
    fn begin_send(&self, batch: &Batch) -> bool {
        let mut in_flight = self.in_flight.lock();
        if in_flight.abandoned {
            return false;
        }
        in_flight.sends.insert(batch.sequence(), batch.len());
        true
    }

    /// Claim a finished send; false if shutdown already accounted for it
    fn finish_send(&self, sequence: u64) -> bool {
        self.in_flight.lock().sends.remove(&sequence).is_some()
    }

    /// Give up on every queued and in-flight batch
    ///
    /// Each one is reported exactly once; no send starts afterwards.
    fn abandon(&self) -> usize {
        let sends: Vec<(u64, usize)> = {
            let mut in_flight = self.in_flight.lock();
            in_flight.abandoned = true;
            in_flight.sends.drain().collect()
        };
        let queued = self.queue.take_all();
        let abandoned = sends.len() + queued.len();

        for (sequence, records) in sends {
            let context = SendContext::new(&self.config.id, sequence, records);
            self.report_abandoned(context, true);
        }
        for batch in queued {
            self.report_abandoned(batch.context(&self.config.id), false);
        }
        abandoned
    }

    /// Count and report a batch shutdown gave up on
    ///
    /// A batch whose send had started counts as failed, one never handed to
    /// the sender as dropped.
    fn report_abandoned(&self, context: SendContext, attempted: bool) -> SendFailure {
        if attempted {
            self.metrics.record_failure(context.records, false);
        } else {
            self.metrics.record_drop(context.records);
        }
        let error = SinkError::abandoned(context.clone(), self.config.shutdown_grace);
        let failure = SendFailure::from_context(context, error);
        self.handlers.report(&failure, &self.metrics);
        failure
    }

    fn report_drop(&self, batch: Batch) {
        tracing::warn!(
            sink = %self.config.id,
            sequence = batch.sequence(),
            records = batch.len(),
            capacity = self.queue.capacity,
            "Pending queue full, dropping oldest batch"
        );
        self.metrics.record_drop(batch.len());
        let error = SinkError::batch_dropped(batch.context(&self.config.id), self.queue.capacity);
        self.report(&batch, error);
    }

    fn report(&self, batch: &Batch, error: SinkError) -> SendFailure {
        let failure = SendFailure::new(&self.config.id, batch, error);
        self.handlers.report(&failure, &self.metrics);
        failure
    }
}

async fn tick_loop(shared: Arc<Shared>, mut stop: oneshot::Receiver<()>) {
    let period = shared.config.flush_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                shared.flush();
            }
        }
    }

    tracing::debug!(sink = %shared.config.id, "Flush timer stopped");
}

async fn dispatch_loop(shared: Arc<Shared>) {
    let permits = Arc::new(Semaphore::new(shared.config.max_in_flight));
    let mut in_flight = JoinSet::new();

    loop {
        // Hold a permit before popping so backlog stays in the bounded queue
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        while let Some(joined) = in_flight.try_join_next() {
            log_join_error(&shared.config.id, joined);
        }

        let Some(batch) = shared.queue.pop().await else {
            break;
        };

        let shared = Arc::clone(&shared);
        in_flight.spawn(async move {
            let _permit = permit;
            shared.deliver(batch).await;
        });
    }

    while let Some(joined) = in_flight.join_next().await {
        log_join_error(&shared.config.id, joined);
    }

    tracing::debug!(sink = %shared.config.id, "Dispatcher stopped");
}

fn log_join_error(sink: &str, joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::warn!(sink = %sink, "Send task ended abnormally: {}", e);
    }
}

enum FlushState {
    Stopped,
    Running {
        ticker: JoinHandle<()>,
        dispatcher: JoinHandle<()>,
        stop: oneshot::Sender<()>,
    },
    Terminated,
}

/// Buffer plus periodic flush and asynchronous delivery
///
/// Created `Stopped`; [`start`](Self::start) arms the timer and
/// [`shutdown`](Self::shutdown) performs the final flush and terminates.
pub struct FlushingSink {
    shared: Arc<Shared>,
    state: Mutex<FlushState>,
}

impl Debug for FlushingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushingSink")
            .field("id", &self.shared.config.id)
            .field("sender", &self.shared.sender)
            .field("running", &self.is_running())
            .field("buffered", &self.shared.buffer.len())
            .field("pending", &self.shared.queue.len())
            .finish_non_exhaustive()
    }
}

impl FlushingSink {
    pub fn new(config: SinkConfig, sender: Arc<dyn Sender>, handlers: ErrorHandlers) -> Self {
        let shared = Shared {
            buffer: BatchingSink::new(),
            metrics: SinkMetrics::new(config.id.clone()),
            queue: PendingQueue::new(config.queue_capacity),
            in_flight: Mutex::new(InFlight::default()),
            sender,
            handlers,
            config,
        };

        Self {
            shared: Arc::new(shared),
            state: Mutex::new(FlushState::Stopped),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.config.id
    }

    pub fn config(&self) -> &SinkConfig {
        &self.shared.config
    }

    /// Arm the flush timer and start the dispatcher
    ///
    /// Calling `start` on a running sink is a no-op. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self) -> Result<(), ConfigError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConfigError::Runtime(e.to_string()))?;

        let mut state = self.state.lock();
        match *state {
            FlushState::Stopped => {}
            FlushState::Running { .. } => return Ok(()),
            FlushState::Terminated => {
                tracing::warn!(sink = %self.id(), "Ignoring start of a shut down output");
                return Ok(());
            }
        }

        let (stop, stop_rx) = oneshot::channel();
        let ticker = runtime.spawn(tick_loop(Arc::clone(&self.shared), stop_rx));
        let dispatcher = runtime.spawn(dispatch_loop(Arc::clone(&self.shared)));
        *state = FlushState::Running {
            ticker,
            dispatcher,
            stop,
        };

        tracing::info!(
            sink = %self.id(),
            sender = self.shared.sender.name(),
            flush_interval_ms = self.shared.config.flush_interval.as_millis() as u64,
            "Output started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), FlushState::Running { .. })
    }

    /// Force a drain now; returns the sequence of the queued batch
    ///
    /// An empty buffer queues nothing and returns `None`.
    pub fn flush(&self) -> Option<u64> {
        self.shared.flush()
    }

    /// Records waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Stop accepting records, flush what is buffered and release the sender
    ///
    /// Waits at most `shutdown_grace` for queued sends. After that every
    /// batch still queued or in flight is reported as abandoned, no further
    /// send starts and the sender is closed. Later calls return immediately.
    pub async fn shutdown(&self) -> MetricsSnapshot {
        let previous = std::mem::replace(&mut *self.state.lock(), FlushState::Terminated);
        let config = &self.shared.config;

        let mut dispatcher = match previous {
            FlushState::Terminated => return self.metrics(),
            FlushState::Running {
                ticker,
                dispatcher,
                stop,
            } => {
                self.shared.buffer.close();
                let _ = stop.send(());
                if let Err(e) = ticker.await {
                    tracing::warn!(sink = %config.id, "Flush timer ended abnormally: {}", e);
                }
                dispatcher
            }
            FlushState::Stopped => {
                self.shared.buffer.close();
                tokio::spawn(dispatch_loop(Arc::clone(&self.shared)))
            }
        };

        if let Some(sequence) = self.shared.flush() {
            tracing::debug!(sink = %config.id, sequence, "Final flush queued");
        }
        self.shared.queue.close();

        if tokio::time::timeout(config.shutdown_grace, &mut dispatcher)
            .await
            .is_err()
        {
            let abandoned = self.shared.abandon();
            tracing::warn!(
                sink = %config.id,
                abandoned,
                grace_ms = config.shutdown_grace.as_millis() as u64,
                "Shutdown grace period exceeded, abandoning queued and in-flight batches"
            );
            // The queue is closed and empty, so the dispatcher only waits
            // out the sends it already started
            drop(dispatcher);
        }

        if let Err(e) = self.shared.sender.close().await {
            tracing::warn!(sink = %config.id, "Failed to close sender: {}", e);
        }

        let snapshot = self.metrics();
        tracing::info!(
            sink = %config.id,
            delivered = snapshot.records_delivered,
            lost = snapshot.records_lost(),
            "Output shut down"
        );
        snapshot
    }
}

impl Sink for FlushingSink {
    fn accept(&self, record: Record) -> Result<(), SinkError> {
        match self.shared.buffer.accept(record) {
            Ok(()) => {
                self.shared.metrics.record_accepted();
                Ok(())
            }
            Err(e) => {
                self.shared.metrics.record_rejected();
                Err(e)
            }
        }
    }
}

impl Drop for FlushingSink {
    fn drop(&mut self) {
        match std::mem::replace(self.state.get_mut(), FlushState::Terminated) {
            FlushState::Running { stop, .. } => {
                let _ = stop.send(());
                self.shared.buffer.close();
                if let Some(sequence) = self.shared.flush() {
                    tracing::warn!(
                        sink = %self.shared.config.id,
                        sequence,
                        "Output dropped without shutdown, queued buffered records"
                    );
                }
                // The dispatcher drains what is queued, then exits
                self.shared.queue.close();
            }
            FlushState::Stopped => {
                let buffered = self.shared.buffer.len();
                if buffered > 0 {
                    tracing::warn!(
                        sink = %self.shared.config.id,
                        buffered,
                        "Output dropped before start, discarding buffered records"
                    );
                }
            }
            FlushState::Terminated => {}
        }
    }
}
