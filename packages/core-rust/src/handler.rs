//! Event handler contract.
//!
//! Handlers are opaque application objects. The processing configuration
//! only needs three things from them: a way to dispatch events, an optional
//! statically declared processing group, and a package-like namespace used
//! as the fallback group name.

use std::any::Any;
use std::sync::Arc;

use crate::message::EventMessage;
use crate::unit_of_work::UnitOfWork;

// ---------------------------------------------------------------------------
// AsAny
// ---------------------------------------------------------------------------

/// Upcast helper enabling downcasts of trait objects to their concrete type.
///
/// Blanket-implemented for every `Send + Sync + 'static` type; traits that
/// need downcasting (handlers, invokers, processors) use it as a supertrait.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ---------------------------------------------------------------------------
// EventHandler
// ---------------------------------------------------------------------------

/// An application component reacting to events.
pub trait EventHandler: AsAny {
    /// Handle a single event within the given unit of work.
    ///
    /// # Errors
    ///
    /// Any error is routed to the listener invocation error handler resolved
    /// for this handler's processing group.
    fn handle(&self, event: &EventMessage, uow: &UnitOfWork) -> anyhow::Result<()>;

    /// Whether this handler is interested in `event`. Defaults to `true`.
    fn can_handle(&self, _event: &EventMessage) -> bool {
        true
    }

    /// The processing group declared on the handler type, if any.
    ///
    /// This is the static tag consulted by the default selector before it
    /// falls back to the configured assignment function.
    fn declared_processing_group(&self) -> Option<&str> {
        None
    }

    /// Fully qualified name of the concrete handler type.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Package-like identifier of the handler type: its module path.
    fn namespace(&self) -> String {
        namespace_of(self.type_name()).to_string()
    }
}

/// Returns the module path of a Rust type name, ignoring generic arguments.
///
/// `my_app::orders::OrderProjection<u64>` becomes `my_app::orders`. A name
/// without a path (for example a primitive) is returned unchanged.
#[must_use]
pub fn namespace_of(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit_once("::").map_or(base, |(namespace, _)| namespace)
}

/// Downcasts a handler to its concrete type.
#[must_use]
pub fn downcast_handler<T: EventHandler>(handler: &dyn EventHandler) -> Option<&T> {
    handler.as_any().downcast_ref::<T>()
}
