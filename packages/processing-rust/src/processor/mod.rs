//! Event processors: the runnable units handlers are assigned to.
//!
//! Two implementations ship with the module:
//! - [`SubscribingEventProcessor`]: handles events on the publishing thread.
//! - [`TrackingEventProcessor`]: pulls events on Tokio tasks, one per
//!   segment, and records its progress in a token store.
//!
//! Any other implementation can be plugged in through an
//! [`EventProcessorBuilder`].

mod pipeline;
pub mod subscribing;
pub mod tracking;

use std::sync::Arc;

use flowline_core::handler::AsAny;
use flowline_core::interceptor::MessageHandlerInterceptor;
use flowline_core::invoker::EventHandlerInvoker;
use flowline_core::source::{StreamableMessageSource, SubscribableMessageSource};

use crate::config::{Configuration, TrackingProcessorSettings};
use crate::context::ProcessingContext;

pub use pipeline::ProcessingPipeline;
pub use subscribing::SubscribingEventProcessor;
pub use tracking::TrackingEventProcessor;

/// A named, startable unit dispatching events to its invoker.
pub trait EventProcessor: AsAny {
    fn name(&self) -> &str;

    /// Adds `interceptor` to the end of the handler interceptor chain. An
    /// interceptor instance already in the chain is not added twice.
    fn register_handler_interceptor(&self, interceptor: Arc<dyn MessageHandlerInterceptor>);

    /// The current handler interceptor chain, in invocation order.
    fn handler_interceptors(&self) -> Vec<Arc<dyn MessageHandlerInterceptor>>;

    fn event_handler_invoker(&self) -> Arc<dyn EventHandlerInvoker>;

    /// # Errors
    ///
    /// Returns an error if the processor cannot begin consuming events.
    fn start(&self) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Returns an error if the processor fails to release its resources.
    fn shutdown(&self) -> anyhow::Result<()>;

    fn is_running(&self) -> bool;
}

/// Builds the processor called `name` around `invoker`.
///
/// Interceptors are registered on the returned processor afterwards.
pub type EventProcessorBuilder = Arc<
    dyn Fn(
            &str,
            &ProcessingContext,
            Arc<dyn EventHandlerInvoker>,
        ) -> anyhow::Result<Arc<dyn EventProcessor>>
        + Send
        + Sync,
>;

/// Selects the streamable source of a tracking processor.
pub type StreamableSourceFactory =
    Arc<dyn Fn(&Configuration) -> Arc<dyn StreamableMessageSource> + Send + Sync>;

/// Selects the subscribable source of a subscribing processor.
pub type SubscribableSourceFactory =
    Arc<dyn Fn(&Configuration) -> Arc<dyn SubscribableMessageSource> + Send + Sync>;

/// Builder of [`TrackingEventProcessor`]s.
///
/// Without a source factory the processor reads the configuration's event
/// bus; without settings it uses [`ProcessingSettings::tracking`].
///
/// [`ProcessingSettings::tracking`]: crate::config::ProcessingSettings::tracking
#[must_use]
pub fn tracking_processor_builder(
    source: Option<StreamableSourceFactory>,
    settings: Option<TrackingProcessorSettings>,
) -> EventProcessorBuilder {
    Arc::new(
        move |name: &str,
              context: &ProcessingContext,
              invoker: Arc<dyn EventHandlerInvoker>|
              -> anyhow::Result<Arc<dyn EventProcessor>> {
            let configuration: &Configuration = context.configuration();
            let source = source.as_ref().map_or_else(
                || configuration.streamable_source(),
                |factory| factory(configuration),
            );
            let settings = settings
                .clone()
                .unwrap_or_else(|| configuration.settings().tracking.clone());
            Ok(Arc::new(TrackingEventProcessor::new(name, invoker, source, settings, context)))
        },
    )
}

/// Builder of [`SubscribingEventProcessor`]s, subscribed to the
/// configuration's event bus unless a source factory is given.
#[must_use]
pub fn subscribing_processor_builder(
    source: Option<SubscribableSourceFactory>,
) -> EventProcessorBuilder {
    Arc::new(
        move |name: &str,
              context: &ProcessingContext,
              invoker: Arc<dyn EventHandlerInvoker>|
              -> anyhow::Result<Arc<dyn EventProcessor>> {
            let configuration: &Configuration = context.configuration();
            let source = source.as_ref().map_or_else(
                || configuration.subscribable_source(),
                |factory| factory(configuration),
            );
            Ok(Arc::new(SubscribingEventProcessor::new(name, invoker, source, context)))
        },
    )
}
