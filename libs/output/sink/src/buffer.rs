//! In-memory record buffer shared by the ingress and flush paths.
//!
//! `accept` appends under a short lock; `drain` swaps the whole buffer out
//! under the same lock, so every record lands in exactly one batch.

use crate::{Batch, Record, Sink, SinkError};
use parking_lot::Mutex;

struct BufferState {
    records: Vec<Record>,
    next_sequence: u64,
    closed: bool,
}

/// Accumulates records until drained into a [`Batch`]
pub struct BatchingSink {
    state: Mutex<BufferState>,
}

impl std::fmt::Debug for BatchingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingSink")
            .field("buffered", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Default for BatchingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchingSink {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a buffer pre-sized for `capacity` records per flush
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                records: Vec::with_capacity(capacity),
                next_sequence: 0,
                closed: false,
            }),
        }
    }

    /// Atomically take the buffered records as an immutable batch
    ///
    /// An empty buffer yields an empty batch that still consumes a sequence
    /// number; callers elide it before sending.
    pub fn drain(&self) -> Batch {
        let mut state = self.state.lock();
        let capacity = state.records.capacity();
        let records = std::mem::replace(&mut state.records, Vec::with_capacity(capacity));
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        Batch::new(sequence, records)
    }

    /// Reject all further records; already buffered ones remain drainable
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            tracing::debug!("Batching sink closed with {} buffered records", state.records.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current number of buffered records
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for BatchingSink {
    fn accept(&self, record: Record) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SinkError::Closed);
        }
        state.records.push(record);
        Ok(())
    }
}
