//! Output assembly.
//!
//! An [`OutputPlugin`] turns validated configuration into a running
//! [`Output`]: one sender, one buffer, one flush timer and the error handler
//! set. The rest of the agent only ever holds the [`Ingress`] capability.

use crate::{
    ConfigError, ErrorHandlers, FlushingSink, MetricsSnapshot, Record, Sender, Sink, SinkConfig,
    SinkError,
};
use std::sync::Arc;

/// A backend that can be assembled into an [`Output`]
pub trait OutputPlugin: Send + Sync {
    /// Stable identifier used for registry lookup and diagnostics
    fn id(&self) -> &str {
        &self.sink_config().id
    }

    fn sink_config(&self) -> &SinkConfig;

    /// Build the backend sender; no connection is made yet
    fn sender(&self) -> Result<Arc<dyn Sender>, ConfigError>;

    fn error_handlers(&self) -> ErrorHandlers {
        ErrorHandlers::logging()
    }

    /// Assemble and start the output with an explicit handler set
    fn build_with(&self, handlers: ErrorHandlers) -> Result<Output, ConfigError> {
        self.sink_config().validate()?;
        let sender = self.sender()?;
        Output::assemble(self.sink_config().clone(), sender, handlers)
    }

    /// Assemble and start the output
    fn build(&self) -> Result<Output, ConfigError> {
        self.build_with(self.error_handlers())
    }
}

/// Cloneable handle the pipeline submits records through
#[derive(Debug, Clone)]
pub struct Ingress {
    sink: Arc<FlushingSink>,
}

impl Ingress {
    pub fn id(&self) -> &str {
        self.sink.id()
    }
}

impl Sink for Ingress {
    fn accept(&self, record: Record) -> Result<(), SinkError> {
        self.sink.accept(record)
    }
}

/// A running output
#[derive(Debug)]
pub struct Output {
    sink: Arc<FlushingSink>,
}

impl Output {
    /// Wire a sender into a new flushing sink and start its timer
    pub fn assemble(
        config: SinkConfig,
        sender: Arc<dyn Sender>,
        handlers: ErrorHandlers,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let sink = FlushingSink::new(config, sender, handlers);
        sink.start()?;
        Ok(Self {
            sink: Arc::new(sink),
        })
    }

    pub fn id(&self) -> &str {
        self.sink.id()
    }

    pub fn config(&self) -> &SinkConfig {
        self.sink.config()
    }

    pub fn ingress(&self) -> Ingress {
        Ingress {
            sink: Arc::clone(&self.sink),
        }
    }

    /// Submit one record
    pub fn accept(&self, record: Record) -> Result<(), SinkError> {
        self.sink.accept(record)
    }

    /// Force a flush now
    pub fn flush(&self) -> Option<u64> {
        self.sink.flush()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.sink.metrics()
    }

    pub fn is_running(&self) -> bool {
        self.sink.is_running()
    }

    /// Flush, wait for delivery within the grace period, release the sender
    pub async fn shutdown(&self) -> MetricsSnapshot {
        self.sink.shutdown().await
    }
}
