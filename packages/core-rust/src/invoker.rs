//! The dispatch target of an event processor.

use crate::handler::AsAny;
use crate::message::EventMessage;
use crate::segment::Segment;
use crate::unit_of_work::UnitOfWork;

/// Dispatches events to the handlers (or saga instances) behind it.
///
/// A processor owns exactly one invoker; composite implementations combine
/// several delegates into one.
pub trait EventHandlerInvoker: AsAny {
    /// Whether any handler behind this invoker wants `event` in `segment`.
    fn can_handle(&self, event: &EventMessage, segment: Segment) -> bool;

    /// Dispatch `event` to every interested handler for `segment`.
    ///
    /// # Errors
    ///
    /// Handler failures that the configured error handling chose to propagate.
    fn handle(
        &self,
        event: &EventMessage,
        uow: &UnitOfWork,
        segment: Segment,
    ) -> anyhow::Result<()>;

    /// Whether the handlers support replaying events from the start.
    fn supports_reset(&self) -> bool {
        true
    }
}
