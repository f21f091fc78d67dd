//! Correlation data providers.

use serde_json::Value;

use crate::message::{EventMessage, MetaData};

/// Metadata key holding the identifier of the message that caused another.
pub const CORRELATION_ID: &str = "correlationId";

/// Metadata key holding the identifier of the first message in a causal chain.
pub const TRACE_ID: &str = "traceId";

/// Derives correlation metadata from the message currently being handled.
pub trait CorrelationDataProvider: Send + Sync {
    fn correlation_data_for(&self, message: &EventMessage) -> MetaData;
}

/// Default provider: `correlationId` is the handled message's identifier and
/// `traceId` is carried over from the message, or starts at its identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageOriginProvider;

impl CorrelationDataProvider for MessageOriginProvider {
    fn correlation_data_for(&self, message: &EventMessage) -> MetaData {
        let trace_id = message
            .metadata_str(TRACE_ID)
            .unwrap_or(&message.identifier)
            .to_string();
        let mut data = MetaData::new();
        data.insert(CORRELATION_ID.to_string(), Value::String(message.identifier.clone()));
        data.insert(TRACE_ID.to_string(), Value::String(trace_id));
        data
    }
}

/// Copies a fixed set of metadata keys from the handled message.
#[derive(Debug, Clone)]
pub struct SimpleCorrelationDataProvider {
    keys: Vec<String>,
}

impl SimpleCorrelationDataProvider {
    #[must_use]
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl CorrelationDataProvider for SimpleCorrelationDataProvider {
    fn correlation_data_for(&self, message: &EventMessage) -> MetaData {
        self.keys
            .iter()
            .filter_map(|key| message.metadata.get(key).map(|v| (key.clone(), v.clone())))
            .collect()
    }
}
