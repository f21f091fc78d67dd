//! Layered per-key overrides with a default fallback.
//!
//! Every axis of processor behaviour (error handling, sequencing, token
//! storage, rollback, transactions) is an [`OverrideTable`]: factories
//! registered for a processing group or processor name, plus one default
//! factory for every other key. All values are built lazily through
//! [`Component`] cells and cached until [`OverrideRegistry::reset`].

use std::collections::HashMap;
use std::sync::Arc;

use flowline_core::error_handling::{
    ErrorHandler, ListenerInvocationErrorHandler, LoggingErrorHandler, PropagatingErrorHandler,
};
use flowline_core::monitor::MessageMonitor;
use flowline_core::saga_store::{InMemorySagaStore, SagaStore};
use flowline_core::sequencing::{SequencingPolicy, SequentialPerAggregatePolicy};
use flowline_core::token_store::{InMemoryTokenStore, TokenStore};
use flowline_core::transaction::{
    NoTransactionManager, RollbackConfiguration, RollbackConfigurationType, TransactionManager,
};
use parking_lot::RwLock;

use crate::component::Component;
use crate::config::{Configuration, MessageMonitorFactory};

// ---------------------------------------------------------------------------
// OverrideTable
// ---------------------------------------------------------------------------

/// Keyed overrides of one axis, falling back to a default component.
pub struct OverrideTable<T> {
    axis: &'static str,
    overrides: RwLock<HashMap<String, Arc<Component<T>>>>,
    default: Component<T>,
}

impl<T: Clone + 'static> OverrideTable<T> {
    pub fn new(
        axis: &'static str,
        default: impl Fn(&Configuration) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            axis,
            overrides: RwLock::new(HashMap::new()),
            default: Component::new(format!("{axis}[default]"), default),
        }
    }

    /// Registers the factory for `key`. Re-registering a key replaces its
    /// factory, with the usual [`Component::update`] caveat for values that
    /// were already built.
    pub fn register(
        &self,
        key: &str,
        factory: impl Fn(&Configuration) -> T + Send + Sync + 'static,
    ) {
        let mut overrides = self.overrides.write();
        if let Some(existing) = overrides.get(key) {
            existing.update(factory);
        } else {
            overrides.insert(
                key.to_string(),
                Arc::new(Component::new(format!("{}[{key}]", self.axis), factory)),
            );
        }
    }

    /// Replaces the factory used for keys without an override.
    pub fn register_default(&self, factory: impl Fn(&Configuration) -> T + Send + Sync + 'static) {
        self.default.update(factory);
    }

    #[must_use]
    pub fn has_override(&self, key: &str) -> bool {
        self.overrides.read().contains_key(key)
    }

    /// The value for `key`: its override when registered, else the default.
    pub fn resolve(&self, key: &str, configuration: &Configuration) -> T {
        // Clone the cell out so the table lock is not held while building.
        let component = self.overrides.read().get(key).cloned();
        match component {
            Some(component) => component.get(configuration),
            None => self.default.get(configuration),
        }
    }

    /// Drops every cached value; factories are kept.
    pub fn reset(&self) {
        for component in self.overrides.read().values() {
            component.reset();
        }
        self.default.reset();
    }
}

impl<T> std::fmt::Debug for OverrideTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.overrides.read().keys().cloned().collect();
        keys.sort();
        f.debug_struct("OverrideTable")
            .field("axis", &self.axis)
            .field("keys", &keys)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// OverrideRegistry
// ---------------------------------------------------------------------------

/// All override tables of the event processing module.
///
/// Group-keyed axes: listener invocation error handlers, sequencing policies.
/// Processor-keyed axes: error handlers, token stores, rollback
/// configurations, transaction managers, message monitor factories.
pub struct OverrideRegistry {
    pub listener_invocation_error_handlers: OverrideTable<Arc<dyn ListenerInvocationErrorHandler>>,
    pub error_handlers: OverrideTable<Arc<dyn ErrorHandler>>,
    pub sequencing_policies: OverrideTable<Arc<dyn SequencingPolicy>>,
    pub token_stores: OverrideTable<Arc<dyn TokenStore>>,
    pub rollback_configurations: OverrideTable<Arc<dyn RollbackConfiguration>>,
    pub transaction_managers: OverrideTable<Arc<dyn TransactionManager>>,
    monitor_factories: RwLock<HashMap<String, Arc<dyn MessageMonitorFactory>>>,
    saga_store: Component<Arc<dyn SagaStore>>,
}

impl OverrideRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listener_invocation_error_handlers: OverrideTable::new(
                "listener_invocation_error_handler",
                |_| Arc::new(LoggingErrorHandler) as Arc<dyn ListenerInvocationErrorHandler>,
            ),
            error_handlers: OverrideTable::new("error_handler", |_| {
                Arc::new(PropagatingErrorHandler) as Arc<dyn ErrorHandler>
            }),
            sequencing_policies: OverrideTable::new("sequencing_policy", |_| {
                Arc::new(SequentialPerAggregatePolicy) as Arc<dyn SequencingPolicy>
            }),
            token_stores: OverrideTable::new("token_store", |_| {
                Arc::new(InMemoryTokenStore::new()) as Arc<dyn TokenStore>
            }),
            rollback_configurations: OverrideTable::new("rollback_configuration", |_| {
                Arc::new(RollbackConfigurationType::AnyError) as Arc<dyn RollbackConfiguration>
            }),
            transaction_managers: OverrideTable::new("transaction_manager", |_| {
                Arc::new(NoTransactionManager) as Arc<dyn TransactionManager>
            }),
            monitor_factories: RwLock::new(HashMap::new()),
            saga_store: Component::new("saga_store", |_| {
                Arc::new(InMemorySagaStore::new()) as Arc<dyn SagaStore>
            }),
        }
    }

    pub fn register_message_monitor_factory(
        &self,
        processor_name: &str,
        factory: Arc<dyn MessageMonitorFactory>,
    ) {
        self.monitor_factories
            .write()
            .insert(processor_name.to_string(), factory);
    }

    /// The monitor of a component: the factory registered for its name, else
    /// the configuration's global lookup. Monitors are not cached.
    pub fn message_monitor(
        &self,
        configuration: &Configuration,
        component_type: &str,
        component_name: &str,
    ) -> Arc<dyn MessageMonitor> {
        let factory = self.monitor_factories.read().get(component_name).cloned();
        match factory {
            Some(factory) => factory.create(configuration, component_type, component_name),
            None => configuration.message_monitor(component_type, component_name),
        }
    }

    pub fn register_saga_store(
        &self,
        factory: impl Fn(&Configuration) -> Arc<dyn SagaStore> + Send + Sync + 'static,
    ) {
        self.saga_store.update(factory);
    }

    pub fn saga_store(&self, configuration: &Configuration) -> Arc<dyn SagaStore> {
        self.saga_store.get(configuration)
    }

    /// Drops every cached value of every axis.
    pub fn reset(&self) {
        self.listener_invocation_error_handlers.reset();
        self.error_handlers.reset();
        self.sequencing_policies.reset();
        self.token_stores.reset();
        self.rollback_configurations.reset();
        self.transaction_managers.reset();
        self.saga_store.reset();
    }
}

impl Default for OverrideRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OverrideRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideRegistry")
            .field("error_handlers", &self.error_handlers)
            .field("token_stores", &self.token_stores)
            .finish_non_exhaustive()
    }
}
