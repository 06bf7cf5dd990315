use crate::{Record, SendContext, SinkError};

/// An ordered, immutable group of records drained together for one send attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    sequence: u64,
    records: Vec<Record>,
}

impl Batch {
    pub(crate) fn new(sequence: u64, records: Vec<Record>) -> Self {
        Self { sequence, records }
    }

    /// Drain-order sequence number, unique per sink
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Records in submission order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Build the error context for this batch
    pub fn context(&self, sink: impl Into<String>) -> SendContext {
        SendContext::new(sink, self.sequence, self.records.len())
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// A failure reported to error handlers
#[derive(Debug, Clone)]
pub struct SendFailure {
    /// Id of the output the batch belonged to
    pub sink: String,
    /// Sequence number of the affected batch
    pub sequence: u64,
    /// Number of records lost with the batch
    pub records: usize,
    /// Cause of the failure
    pub error: SinkError,
}

impl SendFailure {
    /// Failure of `batch`; the lost count comes from the error
    pub fn new(sink: impl Into<String>, batch: &Batch, error: SinkError) -> Self {
        Self {
            sink: sink.into(),
            sequence: batch.sequence(),
            records: error.undelivered(batch.len()),
            error,
        }
    }

    /// Failure of a batch no longer at hand
    pub fn from_context(context: SendContext, error: SinkError) -> Self {
        Self {
            sink: context.sink,
            sequence: context.sequence,
            records: error.undelivered(context.records),
            error,
        }
    }
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "output '{}' lost batch #{} ({} records): {}",
            self.sink, self.sequence, self.records, self.error
        )
    }
}

/// Result of one sender invocation
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Delivered { sequence: u64, records: usize },
    Failed(SendFailure),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }

    pub fn failure(&self) -> Option<&SendFailure> {
        match self {
            SendOutcome::Failed(failure) => Some(failure),
            SendOutcome::Delivered { .. } => None,
        }
    }
}
