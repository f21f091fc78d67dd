//! Sequencing policies decide which events must be handled in order.
//!
//! Events with equal sequence identifiers are handled sequentially (they are
//! routed to the same segment); events without one may be handled in any
//! order.

use crate::handler::AsAny;
use crate::message::EventMessage;

pub trait SequencingPolicy: AsAny {
    /// The sequence identifier for `event`, or `None` for no ordering constraint.
    fn sequence_identifier_for(&self, event: &EventMessage) -> Option<String>;
}

/// Events of the same aggregate are handled in order. The default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialPerAggregatePolicy;

impl SequencingPolicy for SequentialPerAggregatePolicy {
    fn sequence_identifier_for(&self, event: &EventMessage) -> Option<String> {
        event.aggregate_identifier.clone()
    }
}

/// Every event is handled in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialPolicy;

impl SequencingPolicy for SequentialPolicy {
    fn sequence_identifier_for(&self, _event: &EventMessage) -> Option<String> {
        Some("sequential".to_string())
    }
}

/// No ordering constraints at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullConcurrencyPolicy;

impl SequencingPolicy for FullConcurrencyPolicy {
    fn sequence_identifier_for(&self, _event: &EventMessage) -> Option<String> {
        None
    }
}

/// Events sharing a metadata value are handled in order.
#[derive(Debug, Clone)]
pub struct MetaDataSequencingPolicy {
    key: String,
}

impl MetaDataSequencingPolicy {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl SequencingPolicy for MetaDataSequencingPolicy {
    fn sequence_identifier_for(&self, event: &EventMessage) -> Option<String> {
        event
            .metadata
            .get(&self.key)
            .map(|value| value.as_str().map_or_else(|| value.to_string(), str::to_string))
    }
}
