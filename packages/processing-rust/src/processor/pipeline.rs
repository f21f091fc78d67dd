//! Batch processing shared by the built-in processors.

use std::sync::Arc;

use arc_swap::ArcSwap;
use flowline_core::error_handling::{ErrorContext, ErrorHandler};
use flowline_core::interceptor::{InterceptorChain, MessageHandlerInterceptor};
use flowline_core::invoker::EventHandlerInvoker;
use flowline_core::message::EventMessage;
use flowline_core::monitor::MessageMonitor;
use flowline_core::segment::Segment;
use flowline_core::transaction::{RollbackConfiguration, TransactionManager};
use flowline_core::unit_of_work::UnitOfWork;
use tracing::{debug, info_span, warn};

use crate::context::ProcessingContext;

/// A processor's invoker wrapped in its interceptors, transaction handling,
/// monitoring and error handling.
pub struct ProcessingPipeline {
    processor_name: String,
    invoker: Arc<dyn EventHandlerInvoker>,
    interceptors: ArcSwap<Vec<Arc<dyn MessageHandlerInterceptor>>>,
    error_handler: Arc<dyn ErrorHandler>,
    rollback: Arc<dyn RollbackConfiguration>,
    transaction_manager: Arc<dyn TransactionManager>,
    monitor: Arc<dyn MessageMonitor>,
}

impl ProcessingPipeline {
    /// Resolves the processor-keyed collaborators of `processor_name` from
    /// `context`. `component_type` identifies the processor kind to the
    /// message monitor lookup.
    #[must_use]
    pub fn new(
        processor_name: &str,
        component_type: &str,
        invoker: Arc<dyn EventHandlerInvoker>,
        context: &ProcessingContext,
    ) -> Self {
        Self {
            processor_name: processor_name.to_string(),
            invoker,
            interceptors: ArcSwap::from_pointee(Vec::new()),
            error_handler: context.error_handler(processor_name),
            rollback: context.rollback_configuration(processor_name),
            transaction_manager: context.transaction_manager(processor_name),
            monitor: context.message_monitor(component_type, processor_name),
        }
    }

    #[must_use]
    pub fn processor_name(&self) -> &str {
        &self.processor_name
    }

    #[must_use]
    pub fn invoker(&self) -> Arc<dyn EventHandlerInvoker> {
        self.invoker.clone()
    }

    pub fn register_interceptor(&self, interceptor: Arc<dyn MessageHandlerInterceptor>) {
        self.interceptors.rcu(|current| {
            let mut next = Vec::clone(current);
            if !next.iter().any(|existing| Arc::ptr_eq(existing, &interceptor)) {
                next.push(interceptor.clone());
            }
            next
        });
    }

    #[must_use]
    pub fn interceptors(&self) -> Vec<Arc<dyn MessageHandlerInterceptor>> {
        Vec::clone(&self.interceptors.load())
    }

    /// Processes `events` in one transaction, dispatching those the invoker
    /// accepts for `segment`.
    ///
    /// The first failing event ends the batch. The transaction is then rolled
    /// back if the rollback configuration asks for it (committed otherwise) and
    /// the failure goes to the processor's error handler.
    ///
    /// # Errors
    ///
    /// Whatever the error handler returns for a failed batch, or a failed
    /// commit the error handler did not swallow.
    pub fn process_batch(&self, events: &[EventMessage], segment: Segment) -> anyhow::Result<()> {
        let span = info_span!(
            "process_batch",
            processor = %self.processor_name,
            segment = segment.segment_id(),
            size = events.len()
        );
        let _entered = span.enter();

        let interceptors = self.interceptors.load_full();
        let transaction = self.transaction_manager.start_transaction();
        let mut processed = Vec::with_capacity(events.len());
        let mut failure = None;

        for event in events {
            let callback = self.monitor.on_message_ingested(event);
            if !self.invoker.can_handle(event, segment) {
                callback.report_ignored();
                continue;
            }
            let mut uow = UnitOfWork::new(event.clone());
            let target = |uow: &UnitOfWork| -> anyhow::Result<()> {
                self.invoker.handle(uow.message(), uow, segment)
            };
            match InterceptorChain::new(interceptors.as_slice(), &target).proceed(&mut uow) {
                Ok(()) => processed.push(callback),
                Err(error) => {
                    callback.report_failure(&error);
                    failure = Some(error);
                    break;
                }
            }
        }

        let error = match failure {
            None => match transaction.commit() {
                Ok(()) => {
                    processed.into_iter().for_each(|callback| callback.report_success());
                    return Ok(());
                }
                Err(error) => {
                    for callback in processed {
                        callback.report_failure(&error);
                    }
                    error
                }
            },
            Some(error) if self.rollback.roll_back_on(&error) => {
                transaction.rollback();
                for callback in processed {
                    callback.report_failure(&error);
                }
                error
            }
            Some(error) => {
                match transaction.commit() {
                    Ok(()) => processed.into_iter().for_each(|callback| callback.report_success()),
                    Err(commit_error) => {
                        warn!(
                            processor = %self.processor_name,
                            error = %commit_error,
                            "commit after failed event failed"
                        );
                        for callback in processed {
                            callback.report_failure(&commit_error);
                        }
                    }
                }
                error
            }
        };

        debug!(processor = %self.processor_name, error = %error, "batch failed");
        self.error_handler.handle_error(&ErrorContext {
            processor_name: &self.processor_name,
            error: &error,
            failed_events: events,
        })
    }
}

impl std::fmt::Debug for ProcessingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingPipeline")
            .field("processor_name", &self.processor_name)
            .field("interceptors", &self.interceptors.load().len())
            .finish_non_exhaustive()
    }
}
