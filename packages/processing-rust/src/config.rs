//! Ambient configuration handed to every component factory.
//!
//! [`Configuration`] carries what the event processing module consumes from
//! the surrounding application: the event bus, correlation data providers, the
//! global message monitor lookup and the [`ProcessingSettings`].

use std::sync::Arc;
use std::time::Duration;

use flowline_core::correlation::{CorrelationDataProvider, MessageOriginProvider};
use flowline_core::monitor::{MessageMonitor, NoOpMessageMonitor};
use flowline_core::source::{
    EventBus, InMemoryEventBus, StreamableMessageSource, SubscribableMessageSource,
};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Where a tracking processor starts when its token store has no segments yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialPosition {
    /// Replay every event from the beginning of the source.
    #[default]
    Tail,
    /// Skip history and only process events published after start.
    Head,
}

/// Settings of a tracking event processor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackingProcessorSettings {
    /// Maximum number of events read and processed in one transaction.
    pub batch_size: usize,
    /// Number of segments (and worker tasks) the event stream is split into.
    pub segment_count: u32,
    /// Idle time between polls once a worker has caught up, in milliseconds.
    pub poll_interval_ms: u64,
    pub initial_position: InitialPosition,
}

impl TrackingProcessorSettings {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for TrackingProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: 1,
            segment_count: 1,
            poll_interval_ms: 1_000,
            initial_position: InitialPosition::Tail,
        }
    }
}

/// Settings of the event processing module, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    /// Used by tracking processors registered without explicit settings.
    pub tracking: TrackingProcessorSettings,
}

impl ProcessingSettings {
    /// Parses settings from a JSON document. Absent fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is malformed or a field has the wrong type.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// MessageMonitorFactory
// ---------------------------------------------------------------------------

/// Creates the message monitor of one component, identified by its type
/// (e.g. `"TrackingEventProcessor"`) and name.
pub trait MessageMonitorFactory: Send + Sync {
    fn create(
        &self,
        configuration: &Configuration,
        component_type: &str,
        component_name: &str,
    ) -> Arc<dyn MessageMonitor>;
}

impl<F> MessageMonitorFactory for F
where
    F: Fn(&Configuration, &str, &str) -> Arc<dyn MessageMonitor> + Send + Sync,
{
    fn create(
        &self,
        configuration: &Configuration,
        component_type: &str,
        component_name: &str,
    ) -> Arc<dyn MessageMonitor> {
        self(configuration, component_type, component_name)
    }
}

/// Hands out a no-op monitor for every component.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMonitorFactory;

impl MessageMonitorFactory for NoOpMonitorFactory {
    fn create(&self, _: &Configuration, _: &str, _: &str) -> Arc<dyn MessageMonitor> {
        Arc::new(NoOpMessageMonitor)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The application configuration visible to component factories.
pub struct Configuration {
    event_bus: Arc<dyn EventBus>,
    subscribable: Arc<dyn SubscribableMessageSource>,
    streamable: Arc<dyn StreamableMessageSource>,
    correlation_data_providers: Vec<Arc<dyn CorrelationDataProvider>>,
    monitor_factory: Arc<dyn MessageMonitorFactory>,
    settings: ProcessingSettings,
}

impl Configuration {
    #[must_use]
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    #[must_use]
    pub fn event_bus(&self) -> Arc<dyn EventBus> {
        self.event_bus.clone()
    }

    /// The event bus viewed as a push source.
    #[must_use]
    pub fn subscribable_source(&self) -> Arc<dyn SubscribableMessageSource> {
        self.subscribable.clone()
    }

    /// The event bus viewed as a pull source.
    #[must_use]
    pub fn streamable_source(&self) -> Arc<dyn StreamableMessageSource> {
        self.streamable.clone()
    }

    #[must_use]
    pub fn correlation_data_providers(&self) -> &[Arc<dyn CorrelationDataProvider>] {
        &self.correlation_data_providers
    }

    /// Looks up the application-wide monitor for a component.
    #[must_use]
    pub fn message_monitor(
        &self,
        component_type: &str,
        component_name: &str,
    ) -> Arc<dyn MessageMonitor> {
        self.monitor_factory.create(self, component_type, component_name)
    }

    #[must_use]
    pub fn settings(&self) -> &ProcessingSettings {
        &self.settings
    }
}

impl Default for Configuration {
    fn default() -> Self {
        ConfigurationBuilder::default().build()
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("correlation_data_providers", &self.correlation_data_providers.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ConfigurationBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Configuration`]. Unset parts fall back to in-memory and
/// no-op defaults.
#[derive(Default)]
pub struct ConfigurationBuilder {
    event_bus: Option<(
        Arc<dyn EventBus>,
        Arc<dyn SubscribableMessageSource>,
        Arc<dyn StreamableMessageSource>,
    )>,
    correlation_data_providers: Option<Vec<Arc<dyn CorrelationDataProvider>>>,
    monitor_factory: Option<Arc<dyn MessageMonitorFactory>>,
    settings: ProcessingSettings,
}

impl ConfigurationBuilder {
    #[must_use]
    pub fn event_bus<B: EventBus + 'static>(mut self, bus: Arc<B>) -> Self {
        self.event_bus = Some((bus.clone(), bus.clone(), bus));
        self
    }

    /// Replaces the correlation data providers. An empty list disables
    /// correlation data propagation.
    #[must_use]
    pub fn correlation_data_providers(
        mut self,
        providers: Vec<Arc<dyn CorrelationDataProvider>>,
    ) -> Self {
        self.correlation_data_providers = Some(providers);
        self
    }

    #[must_use]
    pub fn message_monitor_factory(
        mut self,
        factory: impl MessageMonitorFactory + 'static,
    ) -> Self {
        self.monitor_factory = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: ProcessingSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn build(self) -> Configuration {
        let (event_bus, subscribable, streamable) = self.event_bus.unwrap_or_else(|| {
            let bus = Arc::new(InMemoryEventBus::new());
            (
                bus.clone() as Arc<dyn EventBus>,
                bus.clone() as Arc<dyn SubscribableMessageSource>,
                bus as Arc<dyn StreamableMessageSource>,
            )
        });
        Configuration {
            event_bus,
            subscribable,
            streamable,
            correlation_data_providers: self
                .correlation_data_providers
                .unwrap_or_else(|| vec![Arc::new(MessageOriginProvider)]),
            monitor_factory: self
                .monitor_factory
                .unwrap_or_else(|| Arc::new(NoOpMonitorFactory)),
            settings: self.settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use flowline_core::message::EventMessage;
    use flowline_core::monitor::MetricsMessageMonitor;
    use parking_lot::Mutex;
    use serde_json::Value;

    use super::*;

    #[test]
    fn settings_defaults() {
        let settings = ProcessingSettings::default();
        assert_eq!(settings.tracking.batch_size, 1);
        assert_eq!(settings.tracking.segment_count, 1);
        assert_eq!(settings.tracking.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.tracking.initial_position, InitialPosition::Tail);
    }

    #[test]
    fn settings_load_partial_json() {
        let json = r#"{"tracking": {"segment_count": 4, "initial_position": "head"}}"#;
        let settings = ProcessingSettings::from_json(json).unwrap();
        assert_eq!(settings.tracking.segment_count, 4);
        assert_eq!(settings.tracking.initial_position, InitialPosition::Head);
        assert_eq!(settings.tracking.batch_size, 1);

        assert!(ProcessingSettings::from_json(r#"{"tracking": {"batch_size": "x"}}"#).is_err());
    }

    #[test]
    fn default_configuration_uses_origin_provider() {
        let configuration = Configuration::default();
        assert_eq!(configuration.correlation_data_providers().len(), 1);
        assert!(configuration.streamable_source().head_token().is_none());
    }

    #[test]
    fn views_share_one_bus() {
        let bus = Arc::new(InMemoryEventBus::new());
        let configuration = Configuration::builder().event_bus(bus.clone()).build();
        configuration
            .event_bus()
            .publish(vec![EventMessage::new("Ping", Value::Null)])
            .unwrap();
        assert_eq!(bus.len(), 1);
        assert!(configuration.streamable_source().head_token().is_some());
    }

    #[test]
    fn monitor_factory_receives_component_identity() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let configuration = Configuration::builder()
            .message_monitor_factory(
                move |_: &Configuration, kind: &str, name: &str| -> Arc<dyn MessageMonitor> {
                    log.lock().push(format!("{kind}:{name}"));
                    Arc::new(MetricsMessageMonitor::new(name))
                },
            )
            .build();
        let _monitor = configuration.message_monitor("TrackingEventProcessor", "orders");
        assert_eq!(*seen.lock(), vec!["TrackingEventProcessor:orders".to_string()]);
    }
}
