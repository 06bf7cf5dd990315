use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of sample carried by a [`Record`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    Gauge,
    Counter,
    Event,
}

impl RecordKind {
    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Gauge => "gauge",
            RecordKind::Counter => "counter",
            RecordKind::Event => "event",
        }
    }
}

/// One metric or event sample emitted by the pipeline
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Record {
    /// Metric or event name
    pub name: String,

    /// Dimensions attached to the sample
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Sample value
    pub value: f64,

    /// When the sample was taken
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub kind: RecordKind,
}

impl Record {
    /// Create a record stamped with the current time
    pub fn new(name: impl Into<String>, value: f64, kind: RecordKind) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            value,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, RecordKind::Gauge)
    }

    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, RecordKind::Counter)
    }

    pub fn event(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, RecordKind::Event)
    }

    /// Attach a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Timestamp as milliseconds since the Unix epoch
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}
