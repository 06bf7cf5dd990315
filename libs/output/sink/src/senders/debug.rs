//! Logs every record instead of shipping it anywhere.

use crate::{Batch, CommonOptions, ConfigError, OutputPlugin, Sender, SinkConfig, SinkError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_ID: &str = "debug";

/// `type = "debug"` entry of the outputs file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DebugConfig {
    #[serde(flatten)]
    pub common: CommonOptions,
}

#[derive(Debug, Clone)]
pub struct DebugOutput {
    config: SinkConfig,
}

impl DebugOutput {
    pub fn new(config: &DebugConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            config: config.common.resolve(DEFAULT_ID)?,
        })
    }
}

impl OutputPlugin for DebugOutput {
    fn sink_config(&self) -> &SinkConfig {
        &self.config
    }

    fn sender(&self) -> Result<Arc<dyn Sender>, ConfigError> {
        Ok(Arc::new(DebugSender::new(&self.config.id)))
    }
}

#[derive(Debug)]
pub struct DebugSender {
    id: String,
}

impl DebugSender {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Sender for DebugSender {
    fn name(&self) -> &str {
        DEFAULT_ID
    }

    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        for record in batch {
            tracing::info!(
                output = %self.id,
                sequence = batch.sequence(),
                kind = record.kind.name(),
                name = %record.name,
                value = record.value,
                tags = ?record.tags,
                timestamp = %record.timestamp,
                "record"
            );
        }
        Ok(())
    }
}
