//! SignalFx ingest over HTTP JSON.
//!
//! Gauges and counters go to `{endpoint}/v2/datapoint`, events to
//! `{endpoint}/v2/event`. Every request carries the `X-SF-Token` header.
//! The HTTP client is built on first send and reused afterwards.

use crate::{
    Batch, CommonOptions, ConfigError, LazyConnection, OutputPlugin, Record, RecordKind, Sender,
    SinkConfig, SinkError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ID: &str = "signalfx";
pub const DEFAULT_ENDPOINT: &str = "https://ingest.signalfx.com";
pub const AUTH_HEADER: &str = "X-SF-Token";

const SOURCE_DIMENSION: &str = "source";
const EVENT_CATEGORY: &str = "USER_DEFINED";

/// `type = "signalfx"` entry of the outputs file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignalFxConfig {
    #[serde(flatten)]
    pub common: CommonOptions,

    /// Ingest token, required
    #[serde(alias = "authToken")]
    pub auth_token: Option<String>,

    /// Ingest base URL
    pub endpoint: Option<String>,
}

/// Validated SignalFx plugin
#[derive(Clone)]
pub struct SignalFxOutput {
    config: SinkConfig,
    auth_token: String,
    datapoint_url: Url,
    event_url: Url,
}

impl Debug for SignalFxOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalFxOutput")
            .field("config", &self.config)
            .field("datapoint_url", &self.datapoint_url.as_str())
            .field("event_url", &self.event_url.as_str())
            .finish_non_exhaustive()
    }
}

impl SignalFxOutput {
    pub fn new(config: &SignalFxConfig) -> Result<Self, ConfigError> {
        let auth_token = config
            .auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ConfigError::MissingField("authToken"))?
            .to_string();

        let sink_config = config.common.resolve(DEFAULT_ID)?;
        let (datapoint_url, event_url) =
            ingest_urls(config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT))?;

        Ok(Self {
            config: sink_config,
            auth_token,
            datapoint_url,
            event_url,
        })
    }

    pub fn datapoint_url(&self) -> &Url {
        &self.datapoint_url
    }

    pub fn event_url(&self) -> &Url {
        &self.event_url
    }
}

impl OutputPlugin for SignalFxOutput {
    fn sink_config(&self) -> &SinkConfig {
        &self.config
    }

    fn sender(&self) -> Result<Arc<dyn Sender>, ConfigError> {
        Ok(Arc::new(SignalFxSender::new(
            &self.config,
            self.auth_token.clone(),
            self.datapoint_url.clone(),
            self.event_url.clone(),
        )))
    }
}

fn ingest_urls(endpoint: &str) -> Result<(Url, Url), ConfigError> {
    let mut base =
        Url::parse(endpoint).map_err(|e| ConfigError::invalid("endpoint", e.to_string()))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            "endpoint",
            format!("unsupported scheme '{}'", base.scheme()),
        ));
    }

    // Keep any path prefix when joining
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    let join = |path: &str| {
        base.join(path)
            .map_err(|e| ConfigError::invalid("endpoint", e.to_string()))
    };
    Ok((join("v2/datapoint")?, join("v2/event")?))
}

#[derive(Debug, Serialize)]
struct Datapoint<'a> {
    metric: &'a str,
    value: f64,
    dimensions: BTreeMap<&'a str, &'a str>,
    timestamp: i64,
}

#[derive(Debug, Default, Serialize)]
struct DatapointBody<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    gauge: Vec<Datapoint<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    counter: Vec<Datapoint<'a>>,
}

#[derive(Debug, Serialize)]
struct EventProperties {
    value: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Event<'a> {
    event_type: &'a str,
    category: &'static str,
    dimensions: BTreeMap<&'a str, &'a str>,
    properties: EventProperties,
    timestamp: i64,
}

/// Record tags plus `source`, unless the record carries its own
fn dimensions<'a>(record: &'a Record, source_name: &'a str) -> BTreeMap<&'a str, &'a str> {
    let mut dimensions: BTreeMap<&str, &str> = record
        .tags
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    dimensions.entry(SOURCE_DIMENSION).or_insert(source_name);
    dimensions
}

fn encode_datapoints<'a>(batch: &'a Batch, source_name: &'a str) -> Option<DatapointBody<'a>> {
    let mut body = DatapointBody::default();

    for record in batch {
        let point = || Datapoint {
            metric: &record.name,
            value: record.value,
            dimensions: dimensions(record, source_name),
            timestamp: record.timestamp_millis(),
        };
        match record.kind {
            RecordKind::Gauge => body.gauge.push(point()),
            RecordKind::Counter => body.counter.push(point()),
            RecordKind::Event => {}
        }
    }

    if body.gauge.is_empty() && body.counter.is_empty() {
        None
    } else {
        Some(body)
    }
}

fn encode_events<'a>(batch: &'a Batch, source_name: &'a str) -> Option<Vec<Event<'a>>> {
    let events: Vec<_> = batch
        .iter()
        .filter(|record| record.kind == RecordKind::Event)
        .map(|record| Event {
            event_type: &record.name,
            category: EVENT_CATEGORY,
            dimensions: dimensions(record, source_name),
            properties: EventProperties {
                value: record.value,
            },
            timestamp: record.timestamp_millis(),
        })
        .collect();

    (!events.is_empty()).then_some(events)
}

/// Sends batches to the SignalFx ingest API
pub struct SignalFxSender {
    id: String,
    source_name: String,
    auth_token: String,
    datapoint_url: Url,
    event_url: Url,
    io_timeout: Duration,
    client: LazyConnection<reqwest::Client>,
}

impl Debug for SignalFxSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalFxSender")
            .field("id", &self.id)
            .field("source_name", &self.source_name)
            .field("datapoint_url", &self.datapoint_url.as_str())
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl SignalFxSender {
    pub fn new(config: &SinkConfig, auth_token: String, datapoint_url: Url, event_url: Url) -> Self {
        let io_timeout = config.io_timeout;
        let client = LazyConnection::new(config.id.clone(), io_timeout, move || async move {
            reqwest::Client::builder()
                .timeout(io_timeout)
                .connect_timeout(io_timeout)
                .user_agent(concat!("ffwd-forwarder/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| SinkError::connection_failed(e.to_string()))
        });

        Self {
            id: config.id.clone(),
            source_name: config.source_name.clone(),
            auth_token,
            datapoint_url,
            event_url,
            io_timeout,
            client,
        }
    }

    pub fn connection(&self) -> &LazyConnection<reqwest::Client> {
        &self.client
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        client: &reqwest::Client,
        url: &Url,
        body: &T,
        batch: &Batch,
    ) -> Result<(), SinkError> {
        let response = client
            .post(url.clone())
            .header(AUTH_HEADER, &self.auth_token)
            .json(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(SinkError::timeout(self.io_timeout)),
            Err(e) if e.is_connect() => {
                self.client.invalidate().await;
                return Err(SinkError::connection_failed(format!("{}: {}", url, e)));
            }
            Err(e) => return Err(SinkError::send_failed(e.to_string(), batch.context(&self.id))),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        Err(SinkError::send_failed(
            format!("HTTP {} from {}: {}", status, url, detail.trim()),
            batch.context(&self.id),
        ))
    }
}

#[async_trait]
impl Sender for SignalFxSender {
    fn name(&self) -> &str {
        DEFAULT_ID
    }

    /// Datapoints are posted before events. If the event post fails, only
    /// the events count as lost.
    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        let client = self.client.get().await?;

        let mut delivered = 0;
        if let Some(body) = encode_datapoints(batch, &self.source_name) {
            self.post(&client, &self.datapoint_url, &body, batch).await?;
            delivered = body.gauge.len() + body.counter.len();
        }
        if let Some(events) = encode_events(batch, &self.source_name) {
            self.post(&client, &self.event_url, &events, batch)
                .await
                .map_err(|e| SinkError::partially_delivered(delivered, e))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.client.close().await;
        Ok(())
    }
}
