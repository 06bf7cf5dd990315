pub mod batch;
pub mod buffer;
pub mod config;
pub mod error;
pub mod flushing;
pub mod handler;
pub mod lazy;
pub mod metrics;
pub mod plugin;
pub mod record;
pub mod registry;
pub mod senders;
pub mod test_utils;

use async_trait::async_trait;
use std::fmt::Debug;

pub use batch::{Batch, SendFailure, SendOutcome};
pub use buffer::BatchingSink;
pub use config::{CommonOptions, OutputsConfig, SinkConfig};
pub use error::{ConfigError, SendContext, SinkError};
pub use flushing::FlushingSink;
pub use handler::{ErrorHandler, ErrorHandlers, LoggingErrorHandler};
pub use lazy::{LazyConnection, LazyConnectionState, LazyMetrics};
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use plugin::{Ingress, Output, OutputPlugin};
pub use record::{Record, RecordKind};
pub use registry::{OutputRegistry, PluginConfig};
pub use senders::{DebugConfig, DebugOutput, DebugSender, SignalFxConfig, SignalFxOutput, SignalFxSender};

/// Anything that accepts records from the pipeline
///
/// `accept` must not block beyond a short lock and fails only once the sink
/// has been shut down.
pub trait Sink: Send + Sync {
    fn accept(&self, record: Record) -> Result<(), SinkError>;
}

/// Backend-specific delivery of one batch
///
/// Implementations own their connection state. The flush path bounds every
/// `send` by the configured I/O timeout, so an implementation that hangs
/// still yields [`SinkError::Timeout`].
#[async_trait]
pub trait Sender: Send + Sync + Debug {
    /// Backend name used in logs
    fn name(&self) -> &str;

    /// Deliver a non-empty batch
    async fn send(&self, batch: &Batch) -> Result<(), SinkError>;

    /// Release connection resources (may be no-op if never connected)
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
