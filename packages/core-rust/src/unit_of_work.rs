//! Per-message processing scope.
//!
//! A [`UnitOfWork`] wraps the message being handled and collects correlation
//! data registered by interceptors. Handlers use it to stamp that correlation
//! data onto the messages they produce as a side effect.

use crate::message::{EventMessage, MetaData};

/// Processing scope of a single event.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    message: EventMessage,
    correlation_data: MetaData,
}

impl UnitOfWork {
    #[must_use]
    pub fn new(message: EventMessage) -> Self {
        Self {
            message,
            correlation_data: MetaData::new(),
        }
    }

    /// The message being processed.
    #[must_use]
    pub fn message(&self) -> &EventMessage {
        &self.message
    }

    /// Correlation data collected so far.
    #[must_use]
    pub fn correlation_data(&self) -> &MetaData {
        &self.correlation_data
    }

    /// Adds correlation entries. Later registrations overwrite earlier ones.
    pub fn register_correlation_data(&mut self, data: MetaData) {
        self.correlation_data.extend(data);
    }

    /// Returns `outgoing` with this unit's correlation data attached.
    #[must_use]
    pub fn correlated(&self, outgoing: EventMessage) -> EventMessage {
        outgoing.and_metadata(&self.correlation_data)
    }
}
