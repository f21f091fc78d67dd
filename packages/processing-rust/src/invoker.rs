//! Handler invokers and their aggregation per event processor.
//!
//! Handlers are first grouped by processing group, then the groups are
//! collected under the processor each group resolves to. Every group becomes
//! one [`SimpleEventHandlerInvoker`] carrying that group's listener error
//! handler and sequencing policy; saga managers follow the simple invokers of
//! their processor. A processor receives all of them as one
//! [`MultiEventHandlerInvoker`].

use std::sync::Arc;

use flowline_core::error_handling::ListenerInvocationErrorHandler;
use flowline_core::handler::EventHandler;
use flowline_core::invoker::EventHandlerInvoker;
use flowline_core::message::EventMessage;
use flowline_core::segment::Segment;
use flowline_core::sequencing::SequencingPolicy;
use flowline_core::unit_of_work::UnitOfWork;
use indexmap::IndexMap;
use tracing::debug;

use crate::assignment::ProcessorNameResolver;
use crate::context::ProcessingContext;
use crate::saga::SagaConfiguration;
use crate::selector::SelectorChain;

// ---------------------------------------------------------------------------
// SimpleEventHandlerInvoker
// ---------------------------------------------------------------------------

/// Invokes the handlers of one processing group in registration order.
pub struct SimpleEventHandlerInvoker {
    handlers: Vec<Arc<dyn EventHandler>>,
    error_handler: Arc<dyn ListenerInvocationErrorHandler>,
    sequencing_policy: Arc<dyn SequencingPolicy>,
}

impl SimpleEventHandlerInvoker {
    #[must_use]
    pub fn new(
        handlers: Vec<Arc<dyn EventHandler>>,
        error_handler: Arc<dyn ListenerInvocationErrorHandler>,
        sequencing_policy: Arc<dyn SequencingPolicy>,
    ) -> Self {
        Self {
            handlers,
            error_handler,
            sequencing_policy,
        }
    }

    #[must_use]
    pub fn event_handlers(&self) -> &[Arc<dyn EventHandler>] {
        &self.handlers
    }

    #[must_use]
    pub fn listener_invocation_error_handler(&self) -> &Arc<dyn ListenerInvocationErrorHandler> {
        &self.error_handler
    }

    #[must_use]
    pub fn sequencing_policy(&self) -> &Arc<dyn SequencingPolicy> {
        &self.sequencing_policy
    }

    // Events without a sequence identifier are spread by their own identifier.
    fn segment_key(&self, event: &EventMessage) -> String {
        self.sequencing_policy
            .sequence_identifier_for(event)
            .unwrap_or_else(|| event.identifier.clone())
    }
}

impl EventHandlerInvoker for SimpleEventHandlerInvoker {
    fn can_handle(&self, event: &EventMessage, segment: Segment) -> bool {
        segment.matches(&self.segment_key(event))
            && self.handlers.iter().any(|handler| handler.can_handle(event))
    }

    fn handle(
        &self,
        event: &EventMessage,
        uow: &UnitOfWork,
        segment: Segment,
    ) -> anyhow::Result<()> {
        if !segment.matches(&self.segment_key(event)) {
            return Ok(());
        }
        for handler in &self.handlers {
            if !handler.can_handle(event) {
                continue;
            }
            if let Err(error) = handler.handle(event, uow) {
                self.error_handler.on_error(error, event, &**handler)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimpleEventHandlerInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers: Vec<&str> = self.handlers.iter().map(|handler| handler.type_name()).collect();
        f.debug_struct("SimpleEventHandlerInvoker")
            .field("handlers", &handlers)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// MultiEventHandlerInvoker
// ---------------------------------------------------------------------------

/// Composite over the invokers of one processor, dispatching in order.
pub struct MultiEventHandlerInvoker {
    delegates: Vec<Arc<dyn EventHandlerInvoker>>,
}

impl MultiEventHandlerInvoker {
    #[must_use]
    pub fn new(delegates: Vec<Arc<dyn EventHandlerInvoker>>) -> Self {
        Self { delegates }
    }

    #[must_use]
    pub fn delegates(&self) -> &[Arc<dyn EventHandlerInvoker>] {
        &self.delegates
    }
}

impl EventHandlerInvoker for MultiEventHandlerInvoker {
    fn can_handle(&self, event: &EventMessage, segment: Segment) -> bool {
        self.delegates
            .iter()
            .any(|delegate| delegate.can_handle(event, segment))
    }

    fn handle(
        &self,
        event: &EventMessage,
        uow: &UnitOfWork,
        segment: Segment,
    ) -> anyhow::Result<()> {
        for delegate in &self.delegates {
            if delegate.can_handle(event, segment) {
                delegate.handle(event, uow, segment)?;
            }
        }
        Ok(())
    }

    fn supports_reset(&self) -> bool {
        self.delegates.iter().all(|delegate| delegate.supports_reset())
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// One contributor to a processor's invoker.
#[derive(Clone)]
pub enum InvokerSource {
    Handlers {
        processing_group: String,
        handlers: Vec<Arc<dyn EventHandler>>,
    },
    Saga(Arc<dyn SagaConfiguration>),
}

impl InvokerSource {
    #[must_use]
    pub fn processing_group(&self) -> &str {
        match self {
            Self::Handlers { processing_group, .. } => processing_group,
            Self::Saga(saga) => saga.processing_group(),
        }
    }
}

/// Everything assigned to one processor, in dispatch order.
#[derive(Clone, Default)]
pub struct ProcessorInvokers {
    sources: Vec<InvokerSource>,
}

impl ProcessorInvokers {
    #[must_use]
    pub fn sources(&self) -> &[InvokerSource] {
        &self.sources
    }

    /// Processing groups contributing to this processor.
    #[must_use]
    pub fn processing_groups(&self) -> Vec<&str> {
        self.sources.iter().map(InvokerSource::processing_group).collect()
    }

    /// Builds the composite invoker, resolving each group's listener error
    /// handler and sequencing policy through `context`.
    #[must_use]
    pub fn build(&self, context: &ProcessingContext) -> MultiEventHandlerInvoker {
        let delegates = self
            .sources
            .iter()
            .map(|source| match source {
                InvokerSource::Handlers {
                    processing_group,
                    handlers,
                } => Arc::new(SimpleEventHandlerInvoker::new(
                    handlers.clone(),
                    context.listener_invocation_error_handler(processing_group),
                    context.sequencing_policy(processing_group),
                )) as Arc<dyn EventHandlerInvoker>,
                InvokerSource::Saga(saga) => saga.manager(),
            })
            .collect();
        MultiEventHandlerInvoker::new(delegates)
    }
}

/// Partitions `handlers` and `sagas` into processors.
///
/// Groups and processors keep the order in which they first appear, handlers
/// keep registration order within their group, and saga sources come after
/// the handler groups of their processor.
#[must_use]
pub fn aggregate_invokers(
    handlers: &[Arc<dyn EventHandler>],
    sagas: &[Arc<dyn SagaConfiguration>],
    selectors: &SelectorChain,
    names: &ProcessorNameResolver,
) -> IndexMap<String, ProcessorInvokers> {
    let mut groups: IndexMap<String, Vec<Arc<dyn EventHandler>>> = IndexMap::new();
    for handler in handlers {
        let group = selectors.select(&**handler);
        groups.entry(group).or_default().push(handler.clone());
    }

    let mut processors: IndexMap<String, ProcessorInvokers> = IndexMap::new();
    for (processing_group, handlers) in groups {
        let processor = names.resolve(&processing_group);
        debug!(
            processing_group = %processing_group,
            processor = %processor,
            "processing group assigned"
        );
        processors
            .entry(processor)
            .or_default()
            .sources
            .push(InvokerSource::Handlers {
                processing_group,
                handlers,
            });
    }
    for saga in sagas {
        let processor = names.resolve(saga.processing_group());
        processors
            .entry(processor)
            .or_default()
            .sources
            .push(InvokerSource::Saga(saga.clone()));
    }
    processors
}
