//! Handler interceptor registrations and chain assembly.

use std::collections::HashMap;
use std::sync::Arc;

use flowline_core::interceptor::{CorrelationDataInterceptor, MessageHandlerInterceptor};
use parking_lot::RwLock;

use crate::config::Configuration;

/// Builds an interceptor registered for one processor.
pub type InterceptorFactory =
    Arc<dyn Fn(&Configuration) -> Arc<dyn MessageHandlerInterceptor> + Send + Sync>;

/// Builds an interceptor for any processor, given its name. `None` skips it.
pub type DefaultInterceptorFactory =
    Arc<dyn Fn(&Configuration, &str) -> Option<Arc<dyn MessageHandlerInterceptor>> + Send + Sync>;

/// Interceptor factories, per processor and for all processors.
#[derive(Default)]
pub struct InterceptorRegistry {
    per_processor: RwLock<HashMap<String, Vec<InterceptorFactory>>>,
    defaults: RwLock<Vec<DefaultInterceptorFactory>>,
}

impl InterceptorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, processor_name: &str, factory: InterceptorFactory) {
        self.per_processor
            .write()
            .entry(processor_name.to_string())
            .or_default()
            .push(factory);
    }

    pub fn register_default(&self, factory: DefaultInterceptorFactory) {
        self.defaults.write().push(factory);
    }

    /// Assembles the chain of `processor_name`: its own interceptors in
    /// registration order, then the defaults that apply to it, then one
    /// interceptor propagating correlation data.
    #[must_use]
    pub fn build_chain(
        &self,
        configuration: &Configuration,
        processor_name: &str,
    ) -> Vec<Arc<dyn MessageHandlerInterceptor>> {
        let mut chain: Vec<Arc<dyn MessageHandlerInterceptor>> = Vec::new();
        if let Some(factories) = self.per_processor.read().get(processor_name) {
            for factory in factories {
                push_unique(&mut chain, factory(configuration));
            }
        }
        for factory in self.defaults.read().iter() {
            if let Some(interceptor) = factory(configuration, processor_name) {
                push_unique(&mut chain, interceptor);
            }
        }
        chain.push(Arc::new(CorrelationDataInterceptor::new(
            configuration.correlation_data_providers().to_vec(),
        )));
        chain
    }
}

fn push_unique(
    chain: &mut Vec<Arc<dyn MessageHandlerInterceptor>>,
    interceptor: Arc<dyn MessageHandlerInterceptor>,
) {
    if !chain.iter().any(|existing| Arc::ptr_eq(existing, &interceptor)) {
        chain.push(interceptor);
    }
}

impl std::fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut processors: Vec<String> = self.per_processor.read().keys().cloned().collect();
        processors.sort();
        f.debug_struct("InterceptorRegistry")
            .field("processors", &processors)
            .field("defaults", &self.defaults.read().len())
            .finish()
    }
}
