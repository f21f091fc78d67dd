//! Saga registrations.
//!
//! A saga contributes one handler invoker (its manager) to the processor its
//! processing group resolves to. Saga instance handling itself lives behind
//! the manager.

use std::sync::Arc;

use flowline_core::invoker::EventHandlerInvoker;

use crate::context::ProcessingContext;

pub trait SagaConfiguration: Send + Sync {
    /// Name of the saga type, e.g. `"ShippingSaga"`.
    fn saga_type(&self) -> &str;

    fn processing_group(&self) -> &str;

    /// Called once per module initialization, before invokers are assembled.
    fn initialize(&self, _context: &ProcessingContext) {}

    /// The invoker dispatching events to saga instances.
    fn manager(&self) -> Arc<dyn EventHandlerInvoker>;
}

/// A saga registration around a ready-made manager.
///
/// The processing group defaults to the saga type suffixed with `Processor`.
pub struct SimpleSagaConfiguration {
    saga_type: String,
    processing_group: String,
    manager: Arc<dyn EventHandlerInvoker>,
}

impl SimpleSagaConfiguration {
    pub fn new(saga_type: impl Into<String>, manager: Arc<dyn EventHandlerInvoker>) -> Self {
        let saga_type = saga_type.into();
        Self {
            processing_group: format!("{saga_type}Processor"),
            saga_type,
            manager,
        }
    }

    #[must_use]
    pub fn in_processing_group(mut self, processing_group: impl Into<String>) -> Self {
        self.processing_group = processing_group.into();
        self
    }
}

impl SagaConfiguration for SimpleSagaConfiguration {
    fn saga_type(&self) -> &str {
        &self.saga_type
    }

    fn processing_group(&self) -> &str {
        &self.processing_group
    }

    fn manager(&self) -> Arc<dyn EventHandlerInvoker> {
        self.manager.clone()
    }
}

impl std::fmt::Debug for SimpleSagaConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleSagaConfiguration")
            .field("saga_type", &self.saga_type)
            .field("processing_group", &self.processing_group)
            .finish_non_exhaustive()
    }
}
