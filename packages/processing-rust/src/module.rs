//! The event processing module: registrations, assembly and lifecycle.
//!
//! Registration happens through `&mut self` methods returning `&mut Self`, so
//! calls chain fluently. [`EventProcessingModule::initialize`] snapshots the
//! registrations: it assigns handlers to processing groups, groups to
//! processors, and creates one lazily built cell per processor. Processors are
//! built on first lookup or on [`start`](EventProcessingModule::start).
//!
//! Processors start in the order their names first appear and shut down in
//! reverse order.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use flowline_core::error_handling::{ErrorHandler, ListenerInvocationErrorHandler};
use flowline_core::handler::EventHandler;
use flowline_core::interceptor::MessageHandlerInterceptor;
use flowline_core::invoker::EventHandlerInvoker;
use flowline_core::monitor::MessageMonitor;
use flowline_core::saga_store::SagaStore;
use flowline_core::sequencing::SequencingPolicy;
use flowline_core::source::{StreamableMessageSource, SubscribableMessageSource};
use flowline_core::token_store::TokenStore;
use flowline_core::transaction::{RollbackConfiguration, TransactionManager};
use indexmap::IndexMap;
use tracing::{debug, error, info};

use crate::assignment::ProcessorNameResolver;
use crate::component::Component;
use crate::config::{Configuration, MessageMonitorFactory, TrackingProcessorSettings};
use crate::context::ProcessingContext;
use crate::error::ConfigError;
use crate::interceptor::{InterceptorFactory, InterceptorRegistry};
use crate::invoker::{aggregate_invokers, ProcessorInvokers};
use crate::lifecycle::ModuleConfiguration;
use crate::overrides::OverrideRegistry;
use crate::processor::{
    subscribing_processor_builder, tracking_processor_builder, EventProcessor,
    EventProcessorBuilder,
};
use crate::saga::SagaConfiguration;
use crate::selector::{ProcessorSelector, SelectorChain, DEFAULT_PRIORITY};

type ProcessorCell = Component<Arc<dyn EventProcessor>, anyhow::Error>;

// ---------------------------------------------------------------------------
// EventProcessingModule
// ---------------------------------------------------------------------------

/// Assigns event handlers to event processors and manages those processors.
pub struct EventProcessingModule {
    configuration: ArcSwapOption<Configuration>,
    overrides: Arc<OverrideRegistry>,
    interceptors: Arc<InterceptorRegistry>,
    selectors: SelectorChain,
    names: ProcessorNameResolver,
    handler_factories: Vec<Component<Arc<dyn EventHandler>>>,
    saga_factories: Vec<Component<Arc<dyn SagaConfiguration>>>,
    processor_builders: HashMap<String, EventProcessorBuilder>,
    default_processor_builder: EventProcessorBuilder,
    sagas: Vec<Arc<dyn SagaConfiguration>>,
    assignments: IndexMap<String, ProcessorInvokers>,
    processors: IndexMap<String, Arc<ProcessorCell>>,
}

impl EventProcessingModule {
    /// Creates a module that builds tracking processors on the configuration's
    /// event bus unless told otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            configuration: ArcSwapOption::empty(),
            overrides: Arc::new(OverrideRegistry::new()),
            interceptors: Arc::new(InterceptorRegistry::new()),
            selectors: SelectorChain::new(),
            names: ProcessorNameResolver::new(),
            handler_factories: Vec::new(),
            saga_factories: Vec::new(),
            processor_builders: HashMap::new(),
            default_processor_builder: tracking_processor_builder(None, None),
            sagas: Vec::new(),
            assignments: IndexMap::new(),
            processors: IndexMap::new(),
        }
    }

    // -- Handlers and sagas --------------------------------------------------

    pub fn register_event_handler(
        &mut self,
        factory: impl Fn(&Configuration) -> Arc<dyn EventHandler> + Send + Sync + 'static,
    ) -> &mut Self {
        let name = format!("event_handler[{}]", self.handler_factories.len());
        self.handler_factories.push(Component::new(name, factory));
        self
    }

    pub fn register_saga_configuration(
        &mut self,
        factory: impl Fn(&Configuration) -> Arc<dyn SagaConfiguration> + Send + Sync + 'static,
    ) -> &mut Self {
        let name = format!("saga[{}]", self.saga_factories.len());
        self.saga_factories.push(Component::new(name, factory));
        self
    }

    /// Replaces the saga store shared by all sagas.
    pub fn register_saga_store(
        &mut self,
        factory: impl Fn(&Configuration) -> Arc<dyn SagaStore> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides.register_saga_store(factory);
        self
    }

    // -- Assignment ----------------------------------------------------------

    /// Assigns handlers matching `predicate` to `processing_group`, at the
    /// default priority.
    pub fn assign_handlers_matching(
        &mut self,
        processing_group: impl Into<String>,
        predicate: impl Fn(&dyn EventHandler) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.assign_handlers_matching_with_priority(processing_group, DEFAULT_PRIORITY, predicate)
    }

    /// Assigns handlers matching `predicate` to `processing_group`. Selectors
    /// with a higher priority are consulted first.
    pub fn assign_handlers_matching_with_priority(
        &mut self,
        processing_group: impl Into<String>,
        priority: i32,
        predicate: impl Fn(&dyn EventHandler) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.selectors
            .add(ProcessorSelector::new(processing_group, priority, predicate));
        self
    }

    /// Handlers no selector matches and without a declared group go to
    /// `processing_group`.
    pub fn by_default_assign_to(&mut self, processing_group: impl Into<String>) -> &mut Self {
        let processing_group = processing_group.into();
        self.by_default_assign_to_fn(move |_| processing_group.clone())
    }

    /// Names the group of handlers no selector matches and without a declared
    /// group.
    pub fn by_default_assign_to_fn(
        &mut self,
        assignment: impl Fn(&dyn EventHandler) -> String + Send + Sync + 'static,
    ) -> &mut Self {
        self.selectors.set_fallback(Arc::new(assignment));
        self
    }

    /// Makes `processing_group` part of the processor `processor_name`.
    pub fn assign_processing_group(
        &mut self,
        processing_group: impl Into<String>,
        processor_name: impl Into<String>,
    ) -> &mut Self {
        self.names.assign(processing_group, processor_name);
        self
    }

    /// Derives the processor name of groups without an explicit assignment.
    pub fn assign_processing_group_rule(
        &mut self,
        rule: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> &mut Self {
        self.names.set_rule(Arc::new(rule));
        self
    }

    // -- Processors ----------------------------------------------------------

    /// Registers how the processor `name` is built.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateProcessor`] if a builder is already registered
    /// under `name`.
    pub fn register_event_processor(
        &mut self,
        name: impl Into<String>,
        builder: impl Fn(
                &str,
                &ProcessingContext,
                Arc<dyn EventHandlerInvoker>,
            ) -> anyhow::Result<Arc<dyn EventProcessor>>
            + Send
            + Sync
            + 'static,
    ) -> Result<&mut Self, ConfigError> {
        self.insert_processor_builder(name.into(), Arc::new(builder))
    }

    /// Registers a tracking processor reading the configuration's event bus
    /// with the configured default tracking settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateProcessor`] if `name` is taken.
    pub fn register_tracking_event_processor(
        &mut self,
        name: impl Into<String>,
    ) -> Result<&mut Self, ConfigError> {
        self.insert_processor_builder(name.into(), tracking_processor_builder(None, None))
    }

    /// Registers a tracking processor reading the source `source` selects,
    /// with explicit settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateProcessor`] if `name` is taken.
    pub fn register_tracking_event_processor_with(
        &mut self,
        name: impl Into<String>,
        source: impl Fn(&Configuration) -> Arc<dyn StreamableMessageSource> + Send + Sync + 'static,
        settings: TrackingProcessorSettings,
    ) -> Result<&mut Self, ConfigError> {
        self.insert_processor_builder(
            name.into(),
            tracking_processor_builder(Some(Arc::new(source)), Some(settings)),
        )
    }

    /// Registers a subscribing processor on the configuration's event bus.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateProcessor`] if `name` is taken.
    pub fn register_subscribing_event_processor(
        &mut self,
        name: impl Into<String>,
    ) -> Result<&mut Self, ConfigError> {
        self.insert_processor_builder(name.into(), subscribing_processor_builder(None))
    }

    /// Registers a subscribing processor on the source `source` selects.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateProcessor`] if `name` is taken.
    pub fn register_subscribing_event_processor_with(
        &mut self,
        name: impl Into<String>,
        source: impl Fn(&Configuration) -> Arc<dyn SubscribableMessageSource>
            + Send
            + Sync
            + 'static,
    ) -> Result<&mut Self, ConfigError> {
        self.insert_processor_builder(
            name.into(),
            subscribing_processor_builder(Some(Arc::new(source))),
        )
    }

    /// Replaces how processors without a registered builder are built.
    pub fn register_event_processor_factory(
        &mut self,
        builder: impl Fn(
                &str,
                &ProcessingContext,
                Arc<dyn EventHandlerInvoker>,
            ) -> anyhow::Result<Arc<dyn EventProcessor>>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.default_processor_builder = Arc::new(builder);
        self
    }

    /// Builds processors without a registered builder as subscribing
    /// processors on the configuration's event bus.
    pub fn using_subscribing_event_processors(&mut self) -> &mut Self {
        self.default_processor_builder = subscribing_processor_builder(None);
        self
    }

    fn insert_processor_builder(
        &mut self,
        name: String,
        builder: EventProcessorBuilder,
    ) -> Result<&mut Self, ConfigError> {
        if self.processor_builders.contains_key(&name) {
            return Err(ConfigError::DuplicateProcessor { name });
        }
        self.processor_builders.insert(name, builder);
        Ok(self)
    }

    // -- Interceptors --------------------------------------------------------

    /// Adds a handler interceptor to the processor `processor_name`.
    ///
    /// When that processor is already built, the interceptor is applied to it
    /// right away as well.
    pub fn register_handler_interceptor(
        &mut self,
        processor_name: &str,
        factory: impl Fn(&Configuration) -> Arc<dyn MessageHandlerInterceptor>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        let factory: InterceptorFactory = Arc::new(factory);
        self.interceptors.register(processor_name, factory.clone());
        if let Some(configuration) = self.configuration.load_full() {
            let built = self.processors.get(processor_name).and_then(|cell| cell.peek());
            if let Some(processor) = built {
                debug!(processor = processor_name, "applying interceptor to running processor");
                processor.register_handler_interceptor(factory(&configuration));
            }
        }
        self
    }

    /// Adds an interceptor factory consulted for every processor. Returning
    /// `None` for a processor name leaves that processor out.
    pub fn register_default_handler_interceptor(
        &mut self,
        factory: impl Fn(&Configuration, &str) -> Option<Arc<dyn MessageHandlerInterceptor>>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.interceptors.register_default(Arc::new(factory));
        self
    }

    // -- Overrides -----------------------------------------------------------

    pub fn register_listener_invocation_error_handler(
        &mut self,
        processing_group: &str,
        factory: impl Fn(&Configuration) -> Arc<dyn ListenerInvocationErrorHandler>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.overrides
            .listener_invocation_error_handlers
            .register(processing_group, factory);
        self
    }

    pub fn register_default_listener_invocation_error_handler(
        &mut self,
        factory: impl Fn(&Configuration) -> Arc<dyn ListenerInvocationErrorHandler>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.overrides
            .listener_invocation_error_handlers
            .register_default(factory);
        self
    }

    pub fn register_error_handler(
        &mut self,
        processor_name: &str,
        factory: impl Fn(&Configuration) -> Arc<dyn ErrorHandler> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides.error_handlers.register(processor_name, factory);
        self
    }

    pub fn register_default_error_handler(
        &mut self,
        factory: impl Fn(&Configuration) -> Arc<dyn ErrorHandler> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides.error_handlers.register_default(factory);
        self
    }

    pub fn register_sequencing_policy(
        &mut self,
        processing_group: &str,
        factory: impl Fn(&Configuration) -> Arc<dyn SequencingPolicy> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides
            .sequencing_policies
            .register(processing_group, factory);
        self
    }

    pub fn register_default_sequencing_policy(
        &mut self,
        factory: impl Fn(&Configuration) -> Arc<dyn SequencingPolicy> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides.sequencing_policies.register_default(factory);
        self
    }

    pub fn register_token_store(
        &mut self,
        processor_name: &str,
        factory: impl Fn(&Configuration) -> Arc<dyn TokenStore> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides.token_stores.register(processor_name, factory);
        self
    }

    pub fn register_default_token_store(
        &mut self,
        factory: impl Fn(&Configuration) -> Arc<dyn TokenStore> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides.token_stores.register_default(factory);
        self
    }

    pub fn register_rollback_configuration(
        &mut self,
        processor_name: &str,
        factory: impl Fn(&Configuration) -> Arc<dyn RollbackConfiguration> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides
            .rollback_configurations
            .register(processor_name, factory);
        self
    }

    pub fn register_default_rollback_configuration(
        &mut self,
        factory: impl Fn(&Configuration) -> Arc<dyn RollbackConfiguration> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides
            .rollback_configurations
            .register_default(factory);
        self
    }

    pub fn register_transaction_manager(
        &mut self,
        processor_name: &str,
        factory: impl Fn(&Configuration) -> Arc<dyn TransactionManager> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides
            .transaction_managers
            .register(processor_name, factory);
        self
    }

    pub fn register_default_transaction_manager(
        &mut self,
        factory: impl Fn(&Configuration) -> Arc<dyn TransactionManager> + Send + Sync + 'static,
    ) -> &mut Self {
        self.overrides.transaction_managers.register_default(factory);
        self
    }

    /// Registers the monitor factory of the processor `processor_name`,
    /// replacing the configuration's global lookup for it.
    pub fn register_message_monitor_factory(
        &mut self,
        processor_name: &str,
        factory: impl MessageMonitorFactory + 'static,
    ) -> &mut Self {
        self.overrides
            .register_message_monitor_factory(processor_name, Arc::new(factory));
        self
    }

    /// Registers one monitor for the processor `processor_name`.
    pub fn register_message_monitor(
        &mut self,
        processor_name: &str,
        factory: impl Fn(&Configuration) -> Arc<dyn MessageMonitor> + Send + Sync + 'static,
    ) -> &mut Self {
        self.register_message_monitor_factory(
            processor_name,
            move |configuration: &Configuration, _: &str, _: &str| factory(configuration),
        )
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Snapshots the registrations against `configuration`.
    ///
    /// Any earlier build state and every cached override value is discarded.
    /// Processors started before are not shut down; call
    /// [`shutdown`](Self::shutdown) first.
    pub fn initialize(&mut self, configuration: Arc<Configuration>) {
        self.configuration.store(Some(configuration.clone()));
        self.processors.clear();
        self.overrides.reset();
        self.selectors.sort();

        let context = ProcessingContext::new(configuration.clone(), self.overrides.clone());
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handler_factories
            .iter()
            .map(|factory| factory.get(&configuration))
            .collect();
        self.sagas = self
            .saga_factories
            .iter()
            .map(|factory| factory.get(&configuration))
            .collect();
        for saga in &self.sagas {
            saga.initialize(&context);
        }

        self.assignments = aggregate_invokers(&handlers, &self.sagas, &self.selectors, &self.names);
        for (name, invokers) in &self.assignments {
            let cell = self.processor_cell(name, invokers.clone(), context.clone());
            self.processors.insert(name.clone(), Arc::new(cell));
        }
        info!(
            handlers = handlers.len(),
            sagas = self.sagas.len(),
            processors = self.processors.len(),
            "event processing initialized"
        );
    }

    fn processor_cell(
        &self,
        name: &str,
        invokers: ProcessorInvokers,
        context: ProcessingContext,
    ) -> ProcessorCell {
        let builder = self
            .processor_builders
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_processor_builder.clone());
        let interceptors = self.interceptors.clone();
        let processor_name = name.to_string();
        Component::fallible(
            format!("event_processor[{name}]"),
            move |_: &Configuration| -> anyhow::Result<Arc<dyn EventProcessor>> {
                let invoker: Arc<dyn EventHandlerInvoker> = Arc::new(invokers.build(&context));
                let processor = builder(&processor_name, &context, invoker)?;
                let chain = interceptors.build_chain(context.configuration(), &processor_name);
                for interceptor in chain {
                    processor.register_handler_interceptor(interceptor);
                }
                debug!(processor = %processor_name, "event processor built");
                Ok(processor)
            },
        )
    }

    /// Builds (where needed) and starts every processor, in assignment order.
    ///
    /// Calling `start` twice without a `shutdown` in between is not supported.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before [`initialize`](Self::initialize);
    /// otherwise the first build or start failure. Processors started before
    /// the failure keep running.
    pub fn start(&self) -> Result<(), ConfigError> {
        let configuration = self.ensure_initialized()?;
        for (name, cell) in &self.processors {
            let processor = build(name, cell, &configuration)?;
            processor.start().map_err(|source| ConfigError::Lifecycle {
                name: name.clone(),
                action: "start",
                source,
            })?;
            info!(processor = %name, "event processor started");
        }
        Ok(())
    }

    /// Shuts down every built processor, in reverse assignment order.
    /// Processors never built stay unbuilt. Does nothing before
    /// [`initialize`](Self::initialize).
    ///
    /// # Errors
    ///
    /// The first shutdown failure; the remaining processors are still shut down.
    pub fn shutdown(&self) -> Result<(), ConfigError> {
        let mut first_error = None;
        for (name, cell) in self.processors.iter().rev() {
            let Some(processor) = cell.peek() else {
                continue;
            };
            match processor.shutdown() {
                Ok(()) => info!(processor = %name, "event processor shut down"),
                Err(source) => {
                    error!(
                        processor = %name,
                        error = %source,
                        "event processor failed to shut down"
                    );
                    first_error.get_or_insert(ConfigError::Lifecycle {
                        name: name.clone(),
                        action: "shut down",
                        source,
                    });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // -- Queries -------------------------------------------------------------

    fn ensure_initialized(&self) -> Result<Arc<Configuration>, ConfigError> {
        self.configuration
            .load_full()
            .ok_or(ConfigError::NotInitialized)
    }

    fn context(&self) -> Result<ProcessingContext, ConfigError> {
        Ok(ProcessingContext::new(self.ensure_initialized()?, self.overrides.clone()))
    }

    /// Names of all processors, in assignment order. Builds nothing.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn processor_names(&self) -> Result<Vec<String>, ConfigError> {
        self.ensure_initialized()?;
        Ok(self.processors.keys().cloned().collect())
    }

    /// Processing groups assigned to the processor `processor_name`, in
    /// dispatch order. Builds nothing.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn processing_groups(&self, processor_name: &str) -> Result<Vec<String>, ConfigError> {
        self.ensure_initialized()?;
        Ok(self
            .assignments
            .get(processor_name)
            .map(|invokers| invokers.processing_groups().into_iter().map(str::to_string).collect())
            .unwrap_or_default())
    }

    /// The processor `processing_group` belongs to.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn processor_name_for(&self, processing_group: &str) -> Result<String, ConfigError> {
        self.ensure_initialized()?;
        Ok(self.names.resolve(processing_group))
    }

    /// The processor called `name`, built if needed. `None` if no handler or
    /// saga is assigned to such a processor.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization,
    /// [`ConfigError::ProcessorBuild`] if building it fails.
    pub fn event_processor(
        &self,
        name: &str,
    ) -> Result<Option<Arc<dyn EventProcessor>>, ConfigError> {
        let configuration = self.ensure_initialized()?;
        self.processors
            .get(name)
            .map(|cell| build(name, cell, &configuration))
            .transpose()
    }

    /// The processor called `name` as its concrete type. `None` if it does not
    /// exist or has another type.
    ///
    /// # Errors
    ///
    /// As [`event_processor`](Self::event_processor).
    pub fn event_processor_as<T: EventProcessor>(
        &self,
        name: &str,
    ) -> Result<Option<Arc<T>>, ConfigError> {
        Ok(self
            .event_processor(name)?
            .and_then(|processor| processor.into_any_arc().downcast::<T>().ok()))
    }

    /// The processor `processing_group` belongs to, built if needed.
    ///
    /// # Errors
    ///
    /// As [`event_processor`](Self::event_processor).
    pub fn event_processor_by_processing_group(
        &self,
        processing_group: &str,
    ) -> Result<Option<Arc<dyn EventProcessor>>, ConfigError> {
        let name = self.processor_name_for(processing_group)?;
        self.event_processor(&name)
    }

    /// All processors, built if needed, in assignment order.
    ///
    /// # Errors
    ///
    /// As [`event_processor`](Self::event_processor).
    pub fn event_processors(
        &self,
    ) -> Result<IndexMap<String, Arc<dyn EventProcessor>>, ConfigError> {
        let configuration = self.ensure_initialized()?;
        self.processors
            .iter()
            .map(|(name, cell)| Ok((name.clone(), build(name, cell, &configuration)?)))
            .collect()
    }

    /// The handler interceptors currently applied to the processor `name`.
    ///
    /// # Errors
    ///
    /// As [`event_processor`](Self::event_processor).
    pub fn interceptors_for(
        &self,
        name: &str,
    ) -> Result<Vec<Arc<dyn MessageHandlerInterceptor>>, ConfigError> {
        Ok(self
            .event_processor(name)?
            .map(|processor| processor.handler_interceptors())
            .unwrap_or_default())
    }

    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn listener_invocation_error_handler(
        &self,
        processing_group: &str,
    ) -> Result<Arc<dyn ListenerInvocationErrorHandler>, ConfigError> {
        Ok(self.context()?.listener_invocation_error_handler(processing_group))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn sequencing_policy(
        &self,
        processing_group: &str,
    ) -> Result<Arc<dyn SequencingPolicy>, ConfigError> {
        Ok(self.context()?.sequencing_policy(processing_group))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn error_handler(
        &self,
        processor_name: &str,
    ) -> Result<Arc<dyn ErrorHandler>, ConfigError> {
        Ok(self.context()?.error_handler(processor_name))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn token_store(&self, processor_name: &str) -> Result<Arc<dyn TokenStore>, ConfigError> {
        Ok(self.context()?.token_store(processor_name))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn rollback_configuration(
        &self,
        processor_name: &str,
    ) -> Result<Arc<dyn RollbackConfiguration>, ConfigError> {
        Ok(self.context()?.rollback_configuration(processor_name))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn transaction_manager(
        &self,
        processor_name: &str,
    ) -> Result<Arc<dyn TransactionManager>, ConfigError> {
        Ok(self.context()?.transaction_manager(processor_name))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn message_monitor(
        &self,
        component_type: &str,
        component_name: &str,
    ) -> Result<Arc<dyn MessageMonitor>, ConfigError> {
        Ok(self.context()?.message_monitor(component_type, component_name))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn saga_store(&self) -> Result<Arc<dyn SagaStore>, ConfigError> {
        Ok(self.context()?.saga_store())
    }

    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before initialization.
    pub fn saga_configurations(&self) -> Result<Vec<Arc<dyn SagaConfiguration>>, ConfigError> {
        self.ensure_initialized()?;
        Ok(self.sagas.clone())
    }
}

fn build(
    name: &str,
    cell: &ProcessorCell,
    configuration: &Configuration,
) -> Result<Arc<dyn EventProcessor>, ConfigError> {
    cell.try_get(configuration)
        .map_err(|source| ConfigError::ProcessorBuild {
            name: name.to_string(),
            source,
        })
}

impl Default for EventProcessingModule {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventProcessingModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessingModule")
            .field("initialized", &self.configuration.load().is_some())
            .field("handlers", &self.handler_factories.len())
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ModuleConfiguration for EventProcessingModule {
    fn initialize(&mut self, configuration: Arc<Configuration>) {
        EventProcessingModule::initialize(self, configuration);
    }

    fn start(&self) -> anyhow::Result<()> {
        EventProcessingModule::start(self)?;
        Ok(())
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        EventProcessingModule::shutdown(self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use flowline_core::handler::downcast_handler;
    use flowline_core::interceptor::{CorrelationDataInterceptor, InterceptorChain};
    use flowline_core::message::{EventMessage, TrackingToken};
    use flowline_core::source::{EventBus, InMemoryEventBus};
    use flowline_core::token_store::InMemoryTokenStore;
    use flowline_core::unit_of_work::UnitOfWork;
    use parking_lot::Mutex;
    use serde_json::Value;
    use tracing_subscriber::EnvFilter;

    use super::*;
    use crate::config::ProcessingSettings;
    use crate::invoker::{MultiEventHandlerInvoker, SimpleEventHandlerInvoker};
    use crate::processor::{SubscribingEventProcessor, TrackingEventProcessor};
    use crate::saga::SimpleSagaConfiguration;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    type Log = Arc<Mutex<Vec<String>>>;

    /// Handler whose namespace is set by the test. `textual` handlers are the
    /// ones the "strings" rule matches.
    struct Sample {
        label: &'static str,
        namespace: &'static str,
        textual: bool,
        log: Log,
    }

    impl EventHandler for Sample {
        fn handle(&self, event: &EventMessage, _uow: &UnitOfWork) -> anyhow::Result<()> {
            self.log
                .lock()
                .push(format!("{}:{}", self.label, event.payload_type));
            Ok(())
        }

        fn namespace(&self) -> String {
            self.namespace.to_string()
        }
    }

    fn sample(
        label: &'static str,
        namespace: &'static str,
        textual: bool,
        log: &Log,
    ) -> Arc<dyn EventHandler> {
        Arc::new(Sample {
            label,
            namespace,
            textual,
            log: log.clone(),
        })
    }

    fn is_textual(handler: &dyn EventHandler) -> bool {
        downcast_handler::<Sample>(handler).is_some_and(|sample| sample.textual)
    }

    fn label(handler: &Arc<dyn EventHandler>) -> &'static str {
        downcast_handler::<Sample>(&**handler).map_or("?", |sample| sample.label)
    }

    fn register(module: &mut EventProcessingModule, handler: &Arc<dyn EventHandler>) {
        let handler = handler.clone();
        module.register_event_handler(move |_| handler.clone());
    }

    /// Labels of the handlers dispatched by the processor `name`, in order.
    fn labels_of(module: &EventProcessingModule, name: &str) -> Vec<&'static str> {
        let processor = module.event_processor(name).unwrap().unwrap();
        let invoker = processor.event_handler_invoker();
        let multi = (*invoker)
            .as_any()
            .downcast_ref::<MultiEventHandlerInvoker>()
            .unwrap();
        multi
            .delegates()
            .iter()
            .filter_map(|delegate| {
                (**delegate)
                    .as_any()
                    .downcast_ref::<SimpleEventHandlerInvoker>()
            })
            .flat_map(|simple| simple.event_handlers().iter().map(label))
            .collect()
    }

    fn configuration() -> Arc<Configuration> {
        Arc::new(Configuration::default())
    }

    struct Named(&'static str);

    impl MessageHandlerInterceptor for Named {
        fn handle(&self, uow: &mut UnitOfWork, chain: InterceptorChain<'_>) -> anyhow::Result<()> {
            chain.proceed(uow)
        }
    }

    fn named(name: &'static str) -> Arc<dyn MessageHandlerInterceptor> {
        Arc::new(Named(name))
    }

    fn fresh_token_store() -> Arc<dyn TokenStore> {
        Arc::new(InMemoryTokenStore::new())
    }

    fn interceptor_names(chain: &[Arc<dyn MessageHandlerInterceptor>]) -> Vec<&'static str> {
        chain
            .iter()
            .map(|interceptor| {
                let any = (**interceptor).as_any();
                if any.is::<CorrelationDataInterceptor>() {
                    "C"
                } else {
                    any.downcast_ref::<Named>().map_or("?", |named| named.0)
                }
            })
            .collect()
    }

    // -- Assignment ----------------------------------------------------------

    #[test]
    fn rule_and_namespace_split_handlers_into_two_processors() {
        init_tracing();
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        let h1 = sample("h1", "a.b", false, &log);
        let h2 = sample("h2", "x.y", true, &log);
        let h3 = sample("h3", "x.z", true, &log);
        for handler in [&h1, &h2, &h3] {
            register(&mut module, handler);
        }
        module.assign_handlers_matching_with_priority("strings", 1, is_textual);

        module.initialize(configuration());

        assert_eq!(module.processor_names().unwrap(), vec!["a.b", "strings"]);
        assert_eq!(labels_of(&module, "a.b"), vec!["h1"]);
        assert_eq!(labels_of(&module, "strings"), vec!["h2", "h3"]);
    }

    #[test]
    fn higher_priority_rule_wins_and_ties_keep_registration_order() {
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h", "a.b", true, &log));
        module
            .assign_handlers_matching_with_priority("low", 1, is_textual)
            .assign_handlers_matching_with_priority("first-tie", 5, is_textual)
            .assign_handlers_matching_with_priority("second-tie", 5, is_textual);

        module.initialize(configuration());

        assert_eq!(module.processor_names().unwrap(), vec!["first-tie"]);
    }

    #[test]
    fn groups_sharing_a_processor_dispatch_in_group_order() {
        let log = Log::default();
        let bus = Arc::new(InMemoryEventBus::new());
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h2", "x.y", true, &log));
        register(&mut module, &sample("n1", "a.c", false, &log));
        register(&mut module, &sample("h3", "x.z", true, &log));
        module
            .assign_handlers_matching_with_priority("strings", 1, is_textual)
            .assign_processing_group("strings", "shared")
            .assign_processing_group("a.c", "shared")
            .using_subscribing_event_processors();

        module.initialize(Arc::new(Configuration::builder().event_bus(bus.clone()).build()));

        assert_eq!(module.processor_names().unwrap(), vec!["shared"]);
        assert_eq!(module.processing_groups("shared").unwrap(), vec!["strings", "a.c"]);
        assert_eq!(module.processor_name_for("a.c").unwrap(), "shared");

        module.start().unwrap();
        bus.publish(vec![EventMessage::new("Ping", Value::Null)]).unwrap();
        module.shutdown().unwrap();

        assert_eq!(*log.lock(), vec!["h2:Ping", "h3:Ping", "n1:Ping"]);
    }

    #[test]
    fn default_assignment_and_naming_rule() {
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "a.b", false, &log));
        register(&mut module, &sample("h2", "x.y", false, &log));
        module
            .by_default_assign_to("everything")
            .assign_processing_group_rule(|group| format!("{group}-processor"));

        module.initialize(configuration());

        assert_eq!(module.processor_names().unwrap(), vec!["everything-processor"]);
        assert_eq!(labels_of(&module, "everything-processor"), vec!["h1", "h2"]);
        assert!(module
            .event_processor_by_processing_group("everything")
            .unwrap()
            .is_some());
    }

    #[test]
    fn reinitializing_rebuilds_the_same_partitioning() {
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "a.b", false, &log));
        register(&mut module, &sample("h2", "x.y", true, &log));
        module.assign_handlers_matching("strings", is_textual);

        module.initialize(configuration());
        let names = module.processor_names().unwrap();
        let before = module.event_processor("strings").unwrap().unwrap();

        module.initialize(configuration());
        assert_eq!(module.processor_names().unwrap(), names);
        assert_eq!(labels_of(&module, "strings"), vec!["h2"]);
        let after = module.event_processor("strings").unwrap().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn sagas_follow_handler_groups_in_their_processor() {
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "shipping", false, &log));
        let manager: Arc<dyn EventHandlerInvoker> =
            Arc::new(MultiEventHandlerInvoker::new(Vec::new()));
        module
            .register_saga_configuration(move |_| -> Arc<dyn SagaConfiguration> {
                Arc::new(SimpleSagaConfiguration::new("ShippingSaga", manager.clone()))
            })
            .assign_processing_group("ShippingSagaProcessor", "shipping");

        module.initialize(configuration());

        assert_eq!(module.saga_configurations().unwrap().len(), 1);
        assert_eq!(
            module.processing_groups("shipping").unwrap(),
            vec!["shipping", "ShippingSagaProcessor"]
        );
        let processor = module.event_processor("shipping").unwrap().unwrap();
        let invoker = processor.event_handler_invoker();
        let multi = (*invoker)
            .as_any()
            .downcast_ref::<MultiEventHandlerInvoker>()
            .unwrap();
        assert_eq!(multi.delegates().len(), 2);
    }

    // -- Processors ----------------------------------------------------------

    #[test]
    fn duplicate_processor_registration_fails() {
        let mut module = EventProcessingModule::new();
        module.register_tracking_event_processor("orders").unwrap();
        let err = module.register_subscribing_event_processor("orders").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProcessor { ref name } if name == "orders"));
    }

    #[test]
    fn queries_before_initialize_fail() {
        let module = EventProcessingModule::new();
        assert!(matches!(module.event_processor("x"), Err(ConfigError::NotInitialized)));
        assert!(matches!(module.processor_names(), Err(ConfigError::NotInitialized)));
        assert!(matches!(module.token_store("x"), Err(ConfigError::NotInitialized)));
        assert!(matches!(
            module.event_processor_by_processing_group("g"),
            Err(ConfigError::NotInitialized)
        ));
        assert!(matches!(module.start(), Err(ConfigError::NotInitialized)));
        module.shutdown().unwrap();
    }

    #[test]
    fn shutdown_without_start_builds_nothing() {
        let builds = Arc::new(AtomicU32::new(0));
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "a.b", false, &log));
        let counter = builds.clone();
        module.register_event_processor_factory(move |name, context, invoker| {
            counter.fetch_add(1, Ordering::SeqCst);
            let processor: Arc<dyn EventProcessor> = Arc::new(SubscribingEventProcessor::new(
                name,
                invoker,
                context.configuration().subscribable_source(),
                context,
            ));
            Ok(processor)
        });

        module.initialize(configuration());
        module.shutdown().unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn explicit_builder_takes_precedence_and_build_failures_surface() {
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "a.b", false, &log));
        register(&mut module, &sample("h2", "x.y", false, &log));
        module
            .register_subscribing_event_processor("a.b")
            .unwrap()
            .register_event_processor("x.y", |_, _, _| Err(anyhow::anyhow!("no capacity")))
            .unwrap();

        module.initialize(configuration());

        assert!(module
            .event_processor_as::<SubscribingEventProcessor>("a.b")
            .unwrap()
            .is_some());
        let Err(err) = module.event_processor("x.y") else {
            panic!("building x.y should fail");
        };
        assert!(matches!(err, ConfigError::ProcessorBuild { ref name, .. } if name == "x.y"));
        assert!(matches!(module.start(), Err(ConfigError::ProcessorBuild { .. })));
    }

    #[test]
    fn typed_lookup_checks_the_concrete_type() {
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "a.b", false, &log));

        module.initialize(configuration());

        assert!(module
            .event_processor_as::<TrackingEventProcessor>("a.b")
            .unwrap()
            .is_some());
        assert!(module
            .event_processor_as::<SubscribingEventProcessor>("a.b")
            .unwrap()
            .is_none());
        assert!(module
            .event_processor_as::<TrackingEventProcessor>("missing")
            .unwrap()
            .is_none());
    }

    // -- Interceptors --------------------------------------------------------

    #[test]
    fn interceptor_chain_is_explicit_then_default_then_correlation() {
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "X", false, &log));
        module
            .register_handler_interceptor("X", |_| named("E"))
            .register_default_handler_interceptor(|_, _| Some(named("D")));

        module.initialize(configuration());

        assert_eq!(interceptor_names(&module.interceptors_for("X").unwrap()), vec!["E", "D", "C"]);
    }

    #[test]
    fn late_interceptors_reach_built_processors_only_once_built() {
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "built", false, &log));
        register(&mut module, &sample("h2", "lazy", false, &log));
        module.initialize(configuration());
        module.event_processor("built").unwrap();

        module
            .register_handler_interceptor("built", |_| named("L1"))
            .register_handler_interceptor("lazy", |_| named("L2"));

        assert_eq!(interceptor_names(&module.interceptors_for("built").unwrap()), vec!["C", "L1"]);
        assert_eq!(interceptor_names(&module.interceptors_for("lazy").unwrap()), vec!["L2", "C"]);

        module.initialize(configuration());
        assert_eq!(interceptor_names(&module.interceptors_for("built").unwrap()), vec!["L1", "C"]);
    }

    // -- Overrides -----------------------------------------------------------

    #[test]
    fn overrides_resolve_per_key_and_stay_cached() {
        let mut module = EventProcessingModule::new();
        let custom: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
        let registered = custom.clone();
        module.register_token_store("K", move |_| registered.clone());
        module.initialize(configuration());

        let k = module.token_store("K").unwrap();
        let j = module.token_store("J").unwrap();
        assert!(Arc::ptr_eq(&k, &custom));
        assert!(!Arc::ptr_eq(&j, &custom));

        module
            .register_token_store("K", |_| fresh_token_store())
            .register_default_token_store(|_| fresh_token_store());
        assert!(Arc::ptr_eq(&module.token_store("K").unwrap(), &k));
        assert!(Arc::ptr_eq(&module.token_store("J").unwrap(), &j));
        assert!(Arc::ptr_eq(&module.token_store("other").unwrap(), &j));
    }

    #[test]
    fn processors_resolve_their_token_store_by_name() {
        let log = Log::default();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "a.b", false, &log));
        let custom: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
        let registered = custom.clone();
        module.register_token_store("a.b", move |_| registered.clone());

        module.initialize(configuration());

        let processor = module
            .event_processor_as::<TrackingEventProcessor>("a.b")
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&processor.token_store(), &custom));
    }

    // -- Lifecycle -----------------------------------------------------------

    #[tokio::test]
    async fn tracking_processors_consume_the_event_bus() {
        init_tracing();
        let log = Log::default();
        let bus = Arc::new(InMemoryEventBus::new());
        bus.publish(vec![
            EventMessage::new("First", Value::Null),
            EventMessage::new("Second", Value::Null),
        ])
        .unwrap();
        let settings =
            ProcessingSettings::from_json(r#"{"tracking": {"poll_interval_ms": 10}}"#).unwrap();
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "a.b", false, &log));
        module.initialize(Arc::new(
            Configuration::builder()
                .event_bus(bus.clone())
                .settings(settings)
                .build(),
        ));

        module.start().unwrap();
        bus.publish(vec![EventMessage::new("Third", Value::Null)]).unwrap();
        for _ in 0..200 {
            if log.lock().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        module.shutdown().unwrap();
        let processor = module
            .event_processor_as::<TrackingEventProcessor>("a.b")
            .unwrap()
            .unwrap();
        processor.await_termination().await;

        assert_eq!(*log.lock(), vec!["h1:First", "h1:Second", "h1:Third"]);
        assert!(!processor.is_running());
        assert_eq!(
            module.token_store("a.b").unwrap().fetch_token("a.b", 0).unwrap(),
            Some(TrackingToken(2))
        );
    }

    #[test]
    fn module_runs_as_a_managed_module() {
        let log = Log::default();
        let bus = Arc::new(InMemoryEventBus::new());
        let mut module = EventProcessingModule::new();
        register(&mut module, &sample("h1", "a.b", false, &log));
        module.using_subscribing_event_processors();

        let mut managed: Box<dyn ModuleConfiguration> = Box::new(module);
        assert_eq!(managed.phase(), 0);
        managed.initialize(Arc::new(Configuration::builder().event_bus(bus.clone()).build()));
        managed.start().unwrap();
        bus.publish(vec![EventMessage::new("Ping", Value::Null)]).unwrap();
        managed.shutdown().unwrap();

        assert_eq!(*log.lock(), vec!["h1:Ping"]);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
