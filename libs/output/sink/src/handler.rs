//! Error handler fan-out.
//!
//! Every failed send (and every batch dropped by backpressure) is reported to
//! all registered handlers. Handlers run on the flush path, so a handler that
//! returns an error or panics is caught here and only logged.

use crate::{SendFailure, SinkError, SinkMetrics};
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Receives failure notifications from an output
pub trait ErrorHandler: Send + Sync {
    /// Name used when the handler itself fails
    fn name(&self) -> &str {
        "error-handler"
    }

    fn handle(&self, failure: &SendFailure) -> Result<(), SinkError>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&SendFailure) -> Result<(), SinkError> + Send + Sync,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn handle(&self, failure: &SendFailure) -> Result<(), SinkError> {
        self(failure)
    }
}

/// Default handler: log the failure at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn name(&self) -> &str {
        "logging"
    }

    fn handle(&self, failure: &SendFailure) -> Result<(), SinkError> {
        tracing::error!(
            sink = %failure.sink,
            sequence = failure.sequence,
            records = failure.records,
            "{}",
            failure.error
        );
        Ok(())
    }
}

/// The set of handlers registered for one output
#[derive(Clone)]
pub struct ErrorHandlers {
    handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl Debug for ErrorHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("ErrorHandlers").field("handlers", &names).finish()
    }
}

impl Default for ErrorHandlers {
    fn default() -> Self {
        Self::logging()
    }
}

impl ErrorHandlers {
    /// Build from an explicit list; an empty list falls back to logging
    pub fn new(handlers: Vec<Arc<dyn ErrorHandler>>) -> Self {
        if handlers.is_empty() {
            return Self::logging();
        }
        Self { handlers }
    }

    /// Only the logging handler
    pub fn logging() -> Self {
        Self {
            handlers: vec![Arc::new(LoggingErrorHandler)],
        }
    }

    /// Register another handler
    pub fn with_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver a failure to every handler exactly once
    ///
    /// Returns the number of handlers that failed.
    pub fn report(&self, failure: &SendFailure, metrics: &SinkMetrics) -> usize {
        let mut failed = 0;

        for handler in &self.handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(failure)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            failed += 1;
            metrics.record_handler_failure();
            let err = SinkError::HandlerFailed {
                handler: handler.name().to_string(),
                reason,
            };
            tracing::warn!(sink = %failure.sink, "{}", err);
        }

        failed
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panicked".to_string()
    }
}
