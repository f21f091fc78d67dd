//! Resolved view of the configuration handed to processor builders.

use std::sync::Arc;

use flowline_core::error_handling::{ErrorHandler, ListenerInvocationErrorHandler};
use flowline_core::monitor::MessageMonitor;
use flowline_core::saga_store::SagaStore;
use flowline_core::sequencing::SequencingPolicy;
use flowline_core::token_store::TokenStore;
use flowline_core::transaction::{RollbackConfiguration, TransactionManager};

use crate::config::Configuration;
use crate::overrides::OverrideRegistry;

/// The ambient configuration together with the override registry.
///
/// Every lookup goes through the layered override tables, so a processor
/// builder sees exactly what the module's queries report.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    configuration: Arc<Configuration>,
    overrides: Arc<OverrideRegistry>,
}

impl ProcessingContext {
    #[must_use]
    pub fn new(configuration: Arc<Configuration>, overrides: Arc<OverrideRegistry>) -> Self {
        Self {
            configuration,
            overrides,
        }
    }

    #[must_use]
    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    #[must_use]
    pub fn listener_invocation_error_handler(
        &self,
        processing_group: &str,
    ) -> Arc<dyn ListenerInvocationErrorHandler> {
        self.overrides
            .listener_invocation_error_handlers
            .resolve(processing_group, &self.configuration)
    }

    #[must_use]
    pub fn sequencing_policy(&self, processing_group: &str) -> Arc<dyn SequencingPolicy> {
        self.overrides
            .sequencing_policies
            .resolve(processing_group, &self.configuration)
    }

    #[must_use]
    pub fn error_handler(&self, processor_name: &str) -> Arc<dyn ErrorHandler> {
        self.overrides
            .error_handlers
            .resolve(processor_name, &self.configuration)
    }

    #[must_use]
    pub fn token_store(&self, processor_name: &str) -> Arc<dyn TokenStore> {
        self.overrides
            .token_stores
            .resolve(processor_name, &self.configuration)
    }

    #[must_use]
    pub fn rollback_configuration(&self, processor_name: &str) -> Arc<dyn RollbackConfiguration> {
        self.overrides
            .rollback_configurations
            .resolve(processor_name, &self.configuration)
    }

    #[must_use]
    pub fn transaction_manager(&self, processor_name: &str) -> Arc<dyn TransactionManager> {
        self.overrides
            .transaction_managers
            .resolve(processor_name, &self.configuration)
    }

    #[must_use]
    pub fn message_monitor(
        &self,
        component_type: &str,
        component_name: &str,
    ) -> Arc<dyn MessageMonitor> {
        self.overrides
            .message_monitor(&self.configuration, component_type, component_name)
    }

    #[must_use]
    pub fn saga_store(&self) -> Arc<dyn SagaStore> {
        self.overrides.saga_store(&self.configuration)
    }
}
