//! Error handlers at the two levels of event processing.
//!
//! - [`ListenerInvocationErrorHandler`]: consulted when a single handler fails
//!   for a single event. Returning `Ok` swallows the failure.
//! - [`ErrorHandler`]: consulted by a processor when a whole batch fails
//!   (after the interceptor chain and transaction). Returning `Err` makes the
//!   processor treat the batch as failed.

use crate::handler::{AsAny, EventHandler};
use crate::message::EventMessage;

/// Details of a failed batch handed to an [`ErrorHandler`].
#[derive(Debug)]
pub struct ErrorContext<'a> {
    /// Name of the processor that failed.
    pub processor_name: &'a str,
    /// The failure.
    pub error: &'a anyhow::Error,
    /// Events of the batch that failed.
    pub failed_events: &'a [EventMessage],
}

/// Processor-level error handling.
pub trait ErrorHandler: AsAny {
    /// # Errors
    ///
    /// Returning an error signals the processor that the failure must not be
    /// ignored.
    fn handle_error(&self, ctx: &ErrorContext<'_>) -> anyhow::Result<()>;
}

/// Handler-invocation error handling.
pub trait ListenerInvocationErrorHandler: AsAny {
    /// # Errors
    ///
    /// Returning an error aborts processing of the current event.
    fn on_error(
        &self,
        error: anyhow::Error,
        event: &EventMessage,
        handler: &dyn EventHandler,
    ) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// LoggingErrorHandler
// ---------------------------------------------------------------------------

/// Logs handler failures and continues with the next handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

impl ListenerInvocationErrorHandler for LoggingErrorHandler {
    fn on_error(
        &self,
        error: anyhow::Error,
        event: &EventMessage,
        handler: &dyn EventHandler,
    ) -> anyhow::Result<()> {
        tracing::error!(
            handler = handler.type_name(),
            event_id = %event.identifier,
            payload_type = %event.payload_type,
            error = %error,
            "event handler failed; continuing with next handler"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PropagatingErrorHandler
// ---------------------------------------------------------------------------

/// Rethrows every failure it is given, at either level.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagatingErrorHandler;

impl ErrorHandler for PropagatingErrorHandler {
    fn handle_error(&self, ctx: &ErrorContext<'_>) -> anyhow::Result<()> {
        Err(anyhow::anyhow!(
            "processor '{}' failed to handle {} event(s): {:#}",
            ctx.processor_name,
            ctx.failed_events.len(),
            ctx.error
        ))
    }
}

impl ListenerInvocationErrorHandler for PropagatingErrorHandler {
    fn on_error(
        &self,
        error: anyhow::Error,
        _event: &EventMessage,
        _handler: &dyn EventHandler,
    ) -> anyhow::Result<()> {
        Err(error)
    }
}
