use std::time::Duration;

/// Context attached to send failures to aid in debugging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendContext {
    /// Id of the output that attempted the send
    pub sink: String,
    /// Sequence number of the batch
    pub sequence: u64,
    /// Number of records in the batch
    pub records: usize,
}

impl SendContext {
    pub fn new(sink: impl Into<String>, sequence: u64, records: usize) -> Self {
        Self {
            sink: sink.into(),
            sequence,
            records,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("Sink closed")]
    Closed,

    #[error("Send failed: {error} (sink: {sink}, batch: #{sequence}, records: {records})",
            sink = .context.sink,
            sequence = .context.sequence,
            records = .context.records)]
    SendFailed { error: String, context: SendContext },

    #[error("Timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Batch dropped, pending queue full (sink: {sink}, batch: #{sequence}, records: {records}, capacity: {capacity})",
            sink = .context.sink,
            sequence = .context.sequence,
            records = .context.records)]
    BatchDropped { context: SendContext, capacity: usize },

    #[error("Batch abandoned at shutdown after {}ms (sink: {sink}, batch: #{sequence}, records: {records})",
            .grace.as_millis(),
            sink = .context.sink,
            sequence = .context.sequence,
            records = .context.records)]
    Abandoned { context: SendContext, grace: Duration },

    #[error("{source} ({delivered} records delivered before the failure)")]
    PartiallyDelivered {
        delivered: usize,
        #[source]
        source: Box<SinkError>,
    },

    #[error("Error handler '{handler}' failed: {reason}")]
    HandlerFailed { handler: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),
}

impl SinkError {
    /// Check if this error indicates the connection should be re-established
    pub fn is_connection_error(&self) -> bool {
        matches!(self, SinkError::ConnectionFailed(_) | SinkError::Timeout(_))
    }

    /// Check if this error means records were lost without a send attempt
    pub fn is_drop(&self) -> bool {
        matches!(self, SinkError::BatchDropped { .. })
    }

    /// Check if the send (or the part that failed) ran out of time
    pub fn is_timeout(&self) -> bool {
        match self {
            SinkError::Timeout(_) => true,
            SinkError::PartiallyDelivered { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Records of a `batch_len` batch that this error lost
    pub fn undelivered(&self, batch_len: usize) -> usize {
        match self {
            SinkError::PartiallyDelivered { delivered, .. } => batch_len.saturating_sub(*delivered),
            _ => batch_len,
        }
    }

    /// Create a send failed error with context
    pub fn send_failed(msg: impl Into<String>, context: SendContext) -> Self {
        SinkError::SendFailed {
            error: msg.into(),
            context,
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        SinkError::ConnectionFailed(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(after: Duration) -> Self {
        SinkError::Timeout(after)
    }

    /// Create a batch dropped error
    pub fn batch_dropped(context: SendContext, capacity: usize) -> Self {
        SinkError::BatchDropped { context, capacity }
    }

    /// Create an error for a batch shutdown gave up on
    pub fn abandoned(context: SendContext, grace: Duration) -> Self {
        SinkError::Abandoned { context, grace }
    }

    /// Wrap a failure that hit after part of the batch was delivered
    pub fn partially_delivered(delivered: usize, source: SinkError) -> Self {
        if delivered == 0 {
            return source;
        }
        SinkError::PartiallyDelivered {
            delivered,
            source: Box::new(source),
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

/// Errors raised while validating output configuration.
///
/// These are the only errors that reach the caller of plugin construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}: must be defined")]
    MissingField(&'static str),

    #[error("{field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Unknown output type: {0}")]
    UnknownType(String),

    #[error("Duplicate output id: {0}")]
    DuplicateId(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Outputs must be built inside a Tokio runtime: {0}")]
    Runtime(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SinkError::timeout(Duration::from_secs(1)).is_connection_error());
        assert!(SinkError::connection_failed("refused").is_connection_error());
        assert!(!SinkError::Closed.is_connection_error());

        let dropped = SinkError::batch_dropped(SendContext::new("sfx", 3, 10), 4);
        assert!(dropped.is_drop());
        assert!(!dropped.is_connection_error());
    }

    #[test]
    fn test_partial_delivery_counts_only_the_failed_part() {
        let err = SinkError::partially_delivered(3, SinkError::timeout(Duration::from_secs(1)));
        assert!(err.is_timeout());
        assert_eq!(err.undelivered(5), 2);
        assert!(err.to_string().contains("3 records delivered"));

        let whole = SinkError::partially_delivered(0, SinkError::connection_failed("refused"));
        assert!(matches!(whole, SinkError::ConnectionFailed(_)));
        assert_eq!(whole.undelivered(5), 5);
        assert!(!whole.is_timeout());

        let abandoned = SinkError::abandoned(SendContext::new("sfx", 2, 4), Duration::from_millis(1500));
        assert!(abandoned.to_string().starts_with("Batch abandoned at shutdown after 1500ms"));
        assert_eq!(abandoned.undelivered(4), 4);
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = SinkError::send_failed("HTTP 503", SendContext::new("signalfx", 7, 42));
        let msg = err.to_string();
        assert!(msg.contains("HTTP 503"));
        assert!(msg.contains("signalfx"));
        assert!(msg.contains("#7"));
        assert!(msg.contains("42"));

        assert_eq!(
            SinkError::timeout(Duration::from_millis(1500)).to_string(),
            "Timeout after 1500ms"
        );
        assert_eq!(
            ConfigError::MissingField("authToken").to_string(),
            "authToken: must be defined"
        );
    }
}
