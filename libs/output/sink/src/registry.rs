//! Output registry built from the outputs file.
//!
//! Each `[[output]]` entry is dispatched on its `type` key to a plugin. All
//! plugins are validated before any output starts, so a bad entry leaves
//! nothing running.

use crate::{
    ConfigError, DebugConfig, DebugOutput, MetricsSnapshot, Output, OutputPlugin, OutputsConfig,
    Record, SignalFxConfig, SignalFxOutput,
};
use std::collections::HashSet;

/// One `[[output]]` entry, tagged by `type`
#[derive(Debug, Clone, PartialEq)]
pub enum PluginConfig {
    Signalfx(SignalFxConfig),
    Debug(DebugConfig),
}

impl PluginConfig {
    /// Dispatch a raw TOML table on its `type` key
    pub fn from_value(value: toml::Value) -> Result<Self, ConfigError> {
        let toml::Value::Table(mut table) = value else {
            return Err(ConfigError::Parse("output entry must be a table".to_string()));
        };

        let kind = match table.remove("type") {
            Some(toml::Value::String(kind)) => kind,
            Some(_) => return Err(ConfigError::invalid("type", "must be a string")),
            None => return Err(ConfigError::MissingField("type")),
        };

        let value = toml::Value::Table(table);
        match kind.as_str() {
            "signalfx" => Ok(PluginConfig::Signalfx(value.try_into::<SignalFxConfig>()?)),
            "debug" => Ok(PluginConfig::Debug(value.try_into::<DebugConfig>()?)),
            _ => Err(ConfigError::UnknownType(kind)),
        }
    }

    /// The `type` this entry was tagged with
    pub fn kind(&self) -> &'static str {
        match self {
            PluginConfig::Signalfx(_) => "signalfx",
            PluginConfig::Debug(_) => "debug",
        }
    }

    /// Validate and construct the plugin
    pub fn into_plugin(&self) -> Result<Box<dyn OutputPlugin>, ConfigError> {
        let plugin: Box<dyn OutputPlugin> = match self {
            PluginConfig::Signalfx(config) => Box::new(SignalFxOutput::new(config)?),
            PluginConfig::Debug(config) => Box::new(DebugOutput::new(config)?),
        };
        Ok(plugin)
    }
}

/// Every running output of the agent
#[derive(Debug, Default)]
pub struct OutputRegistry {
    outputs: Vec<Output>,
}

impl OutputRegistry {
    /// Build and start every configured output
    pub fn build(config: &OutputsConfig) -> Result<Self, ConfigError> {
        let plugins = config
            .outputs
            .iter()
            .map(PluginConfig::into_plugin)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_plugins(plugins)
    }

    /// Build and start outputs from already constructed plugins
    ///
    /// Ids and sink settings of every plugin are checked before any output
    /// starts. If a later build still fails, the outputs already started are
    /// dropped, which stops their timers before anything was accepted.
    pub fn from_plugins(plugins: Vec<Box<dyn OutputPlugin>>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for plugin in &plugins {
            if !seen.insert(plugin.id().to_string()) {
                return Err(ConfigError::DuplicateId(plugin.id().to_string()));
            }
            plugin.sink_config().validate()?;
        }

        let outputs = plugins
            .iter()
            .map(|plugin| plugin.build())
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!("Started {} output(s)", outputs.len());
        Ok(Self { outputs })
    }

    pub fn get(&self, id: &str) -> Option<&Output> {
        self.outputs.iter().find(|output| output.id() == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(Output::id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Submit a record to every output; returns how many accepted it
    pub fn accept_all(&self, record: &Record) -> usize {
        self.outputs
            .iter()
            .filter(|output| match output.accept(record.clone()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(output = %output.id(), "Record rejected: {}", e);
                    false
                }
            })
            .count()
    }

    /// Force a flush on every output
    pub fn flush_all(&self) {
        for output in &self.outputs {
            output.flush();
        }
    }

    /// Shut every output down concurrently
    pub async fn shutdown_all(&self) -> Vec<MetricsSnapshot> {
        futures::future::join_all(self.outputs.iter().map(|output| output.shutdown())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CollectingSender;
    use crate::{Sender, SinkConfig};
    use std::sync::Arc;

    struct CollectingPlugin {
        config: SinkConfig,
        sender: Arc<CollectingSender>,
    }

    impl CollectingPlugin {
        fn boxed(id: &str) -> (Box<dyn OutputPlugin>, Arc<CollectingSender>) {
            Self::boxed_with(SinkConfig::with_defaults(id))
        }

        fn boxed_with(config: SinkConfig) -> (Box<dyn OutputPlugin>, Arc<CollectingSender>) {
            let sender = Arc::new(CollectingSender::with_name(config.id.clone()));
            let plugin = Self {
                config,
                sender: Arc::clone(&sender),
            };
            (Box::new(plugin), sender)
        }
    }

    impl OutputPlugin for CollectingPlugin {
        fn sink_config(&self) -> &SinkConfig {
            &self.config
        }

        fn sender(&self) -> Result<Arc<dyn Sender>, ConfigError> {
            Ok(self.sender.clone())
        }
    }

    #[test]
    fn test_dispatch_on_type() {
        let config = OutputsConfig::from_toml_str(
            r#"
[[output]]
type = "signalfx"
authToken = "secret"
sourceName = "agent"
soTimeout = 2000

[[output]]
type = "debug"
"#,
        )
        .unwrap();

        assert_eq!(config.outputs.len(), 2);
        assert_eq!(config.outputs[0].kind(), "signalfx");
        assert_eq!(config.outputs[1].kind(), "debug");

        let PluginConfig::Signalfx(signalfx) = &config.outputs[0] else {
            panic!("expected signalfx entry");
        };
        assert_eq!(signalfx.auth_token.as_deref(), Some("secret"));
        assert_eq!(signalfx.common.source_name.as_deref(), Some("agent"));
        assert_eq!(signalfx.common.so_timeout, Some(2000));
    }

    #[test]
    fn test_unknown_and_missing_type() {
        let err = OutputsConfig::from_toml_str("[[output]]\ntype = \"kafka\"\n").unwrap_err();
        assert_eq!(err, ConfigError::UnknownType("kafka".to_string()));

        let err = OutputsConfig::from_toml_str("[[output]]\nid = \"x\"\n").unwrap_err();
        assert_eq!(err, ConfigError::MissingField("type"));
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let config = OutputsConfig::from_toml_str(
            "[[output]]\ntype = \"debug\"\n\n[[output]]\ntype = \"debug\"\n",
        )
        .unwrap();

        let err = OutputRegistry::build(&config).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateId("debug".to_string()));
    }

    #[tokio::test]
    async fn test_missing_credential_starts_nothing() {
        let config = OutputsConfig::from_toml_str(
            "[[output]]\ntype = \"debug\"\n\n[[output]]\ntype = \"signalfx\"\n",
        )
        .unwrap();

        let err = OutputRegistry::build(&config).unwrap_err();
        assert_eq!(err, ConfigError::MissingField("authToken"));
    }

    #[tokio::test]
    async fn test_invalid_sink_settings_start_nothing() {
        let (valid, valid_sender) = CollectingPlugin::boxed("valid");
        let config = SinkConfig::with_defaults("stalled").with_max_in_flight(0);
        let (stalled, _) = CollectingPlugin::boxed_with(config);

        let err = OutputRegistry::from_plugins(vec![valid, stalled]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "maxInFlight",
                ..
            }
        ));
        assert_eq!(valid_sender.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_overridden_build_is_used() {
        struct CustomBuild {
            config: SinkConfig,
            sender: Arc<CollectingSender>,
            built: Arc<std::sync::atomic::AtomicBool>,
        }

        impl OutputPlugin for CustomBuild {
            fn sink_config(&self) -> &SinkConfig {
                &self.config
            }

            fn sender(&self) -> Result<Arc<dyn Sender>, ConfigError> {
                Ok(self.sender.clone())
            }

            fn build(&self) -> Result<Output, ConfigError> {
                self.built.store(true, std::sync::atomic::Ordering::SeqCst);
                self.build_with(self.error_handlers())
            }
        }

        let built = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let plugin = CustomBuild {
            config: SinkConfig::with_defaults("custom"),
            sender: Arc::new(CollectingSender::new()),
            built: Arc::clone(&built),
        };

        let registry = OutputRegistry::from_plugins(vec![Box::new(plugin)]).unwrap();
        assert!(built.load(std::sync::atomic::Ordering::SeqCst));
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_fan_out_and_shutdown() {
        let (first, first_sender) = CollectingPlugin::boxed("first");
        let (second, second_sender) = CollectingPlugin::boxed("second");
        let registry = OutputRegistry::from_plugins(vec![first, second]).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["first", "second"]);
        assert!(registry.get("second").is_some());
        assert!(registry.get("third").is_none());

        assert_eq!(registry.accept_all(&Record::gauge("cpu", 0.5)), 2);
        registry.flush_all();
        first_sender.wait_for_records(1).await;
        second_sender.wait_for_records(1).await;

        let snapshots = registry.shutdown_all().await;
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.iter().all(|s| s.records_delivered == 1));

        assert_eq!(registry.accept_all(&Record::gauge("cpu", 0.5)), 0);
    }
}
