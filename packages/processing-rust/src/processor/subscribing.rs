//! Processor handling events on the thread that publishes them.

use std::sync::Arc;

use flowline_core::interceptor::MessageHandlerInterceptor;
use flowline_core::invoker::EventHandlerInvoker;
use flowline_core::message::EventMessage;
use flowline_core::segment::Segment;
use flowline_core::source::{Registration, SubscribableMessageSource};
use parking_lot::Mutex;
use tracing::info;

use super::pipeline::ProcessingPipeline;
use super::EventProcessor;
use crate::context::ProcessingContext;

/// Subscribes to a [`SubscribableMessageSource`] while running. Failures the
/// error handler propagates are returned to the publisher.
pub struct SubscribingEventProcessor {
    pipeline: Arc<ProcessingPipeline>,
    source: Arc<dyn SubscribableMessageSource>,
    subscription: Mutex<Option<Registration>>,
}

impl SubscribingEventProcessor {
    pub const COMPONENT_TYPE: &'static str = "SubscribingEventProcessor";

    #[must_use]
    pub fn new(
        name: &str,
        invoker: Arc<dyn EventHandlerInvoker>,
        source: Arc<dyn SubscribableMessageSource>,
        context: &ProcessingContext,
    ) -> Self {
        Self {
            pipeline: Arc::new(ProcessingPipeline::new(
                name,
                Self::COMPONENT_TYPE,
                invoker,
                context,
            )),
            source,
            subscription: Mutex::new(None),
        }
    }
}

impl EventProcessor for SubscribingEventProcessor {
    fn name(&self) -> &str {
        self.pipeline.processor_name()
    }

    fn register_handler_interceptor(&self, interceptor: Arc<dyn MessageHandlerInterceptor>) {
        self.pipeline.register_interceptor(interceptor);
    }

    fn handler_interceptors(&self) -> Vec<Arc<dyn MessageHandlerInterceptor>> {
        self.pipeline.interceptors()
    }

    fn event_handler_invoker(&self) -> Arc<dyn EventHandlerInvoker> {
        self.pipeline.invoker()
    }

    fn start(&self) -> anyhow::Result<()> {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return Ok(());
        }
        let pipeline = self.pipeline.clone();
        *subscription = Some(self.source.subscribe(Arc::new(
            move |events: &[EventMessage]| -> anyhow::Result<()> {
                pipeline.process_batch(events, Segment::ROOT)
            },
        )));
        info!(processor = %self.name(), "subscribing event processor started");
        Ok(())
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(registration) = self.subscription.lock().take() {
            registration.cancel();
            info!(processor = %self.name(), "subscribing event processor stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.subscription.lock().is_some()
    }
}

impl std::fmt::Debug for SubscribingEventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribingEventProcessor")
            .field("name", &self.pipeline.processor_name())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use flowline_core::error_handling::{ListenerInvocationErrorHandler, PropagatingErrorHandler};
    use flowline_core::handler::EventHandler;
    use flowline_core::source::{EventBus, InMemoryEventBus};
    use flowline_core::unit_of_work::UnitOfWork;
    use serde_json::Value;

    use super::*;
    use crate::config::Configuration;
    use crate::invoker::{MultiEventHandlerInvoker, SimpleEventHandlerInvoker};
    use crate::overrides::OverrideRegistry;

    #[derive(Default)]
    struct Counter {
        seen: AtomicUsize,
        fail: bool,
    }

    impl EventHandler for Counter {
        fn handle(&self, _event: &EventMessage, _uow: &UnitOfWork) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("counter refused");
            }
            Ok(())
        }
    }

    fn processor(
        bus: &Arc<InMemoryEventBus>,
        handler: Arc<Counter>,
        overrides: OverrideRegistry,
    ) -> SubscribingEventProcessor {
        let overrides = Arc::new(overrides);
        let context = ProcessingContext::new(
            Arc::new(Configuration::builder().event_bus(bus.clone()).build()),
            overrides,
        );
        let simple: Arc<dyn EventHandlerInvoker> = Arc::new(SimpleEventHandlerInvoker::new(
            vec![handler as Arc<dyn EventHandler>],
            context.listener_invocation_error_handler("counters"),
            context.sequencing_policy("counters"),
        ));
        let invoker = Arc::new(MultiEventHandlerInvoker::new(vec![simple]));
        let source = context.configuration().subscribable_source();
        SubscribingEventProcessor::new("counters", invoker, source, &context)
    }

    #[test]
    fn handles_published_events_while_running() {
        let bus = Arc::new(InMemoryEventBus::new());
        let counter = Arc::new(Counter::default());
        let processor = processor(&bus, counter.clone(), OverrideRegistry::new());

        bus.publish(vec![EventMessage::new("Before", Value::Null)]).unwrap();
        processor.start().unwrap();
        assert!(processor.is_running());
        bus.publish(vec![
            EventMessage::new("A", Value::Null),
            EventMessage::new("B", Value::Null),
        ])
        .unwrap();
        processor.shutdown().unwrap();
        assert!(!processor.is_running());
        bus.publish(vec![EventMessage::new("After", Value::Null)]).unwrap();

        assert_eq!(counter.seen.load(Ordering::SeqCst), 2);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn start_twice_subscribes_once() {
        let bus = Arc::new(InMemoryEventBus::new());
        let processor = processor(&bus, Arc::new(Counter::default()), OverrideRegistry::new());
        processor.start().unwrap();
        processor.start().unwrap();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn propagated_failures_reach_the_publisher() {
        let bus = Arc::new(InMemoryEventBus::new());
        let overrides = OverrideRegistry::new();
        overrides.listener_invocation_error_handlers.register("counters", |_| {
            Arc::new(PropagatingErrorHandler) as Arc<dyn ListenerInvocationErrorHandler>
        });
        let counter = Arc::new(Counter {
            seen: AtomicUsize::new(0),
            fail: true,
        });
        let processor = processor(&bus, counter, overrides);
        processor.start().unwrap();

        let err = bus
            .publish(vec![EventMessage::new("A", Value::Null)])
            .unwrap_err();
        assert!(err.to_string().contains("counter refused"));
    }
}
