//! Storage of long-running process (saga) instances.
//!
//! Saga managers are registered with the processing configuration only as
//! contributors of handler invokers; they persist their instances through a
//! [`SagaStore`] shared across all of them.

use dashmap::DashMap;
use serde_json::Value;

use crate::handler::AsAny;

/// A saga association: the `(key, value)` pair used to route events to it.
pub type AssociationValue = (String, String);

/// A stored saga instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaEntry {
    pub state: Value,
    pub associations: Vec<AssociationValue>,
}

pub trait SagaStore: AsAny {
    /// # Errors
    ///
    /// Backend failures.
    fn load(&self, saga_type: &str, saga_id: &str) -> anyhow::Result<Option<SagaEntry>>;

    /// Identifiers of `saga_type` instances associated with `association`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn find_sagas(
        &self,
        saga_type: &str,
        association: &AssociationValue,
    ) -> anyhow::Result<Vec<String>>;

    /// Inserts or replaces an instance.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn save(&self, saga_type: &str, saga_id: &str, entry: SagaEntry) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Backend failures.
    fn delete(&self, saga_type: &str, saga_id: &str) -> anyhow::Result<()>;
}

/// Non-persistent saga store. The default.
#[derive(Debug, Default)]
pub struct InMemorySagaStore {
    sagas: DashMap<(String, String), SagaEntry>,
}

impl InMemorySagaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SagaStore for InMemorySagaStore {
    fn load(&self, saga_type: &str, saga_id: &str) -> anyhow::Result<Option<SagaEntry>> {
        Ok(self
            .sagas
            .get(&(saga_type.to_string(), saga_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    fn find_sagas(
        &self,
        saga_type: &str,
        association: &AssociationValue,
    ) -> anyhow::Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .sagas
            .iter()
            .filter(|entry| {
                entry.key().0 == saga_type && entry.value().associations.contains(association)
            })
            .map(|entry| entry.key().1.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn save(&self, saga_type: &str, saga_id: &str, entry: SagaEntry) -> anyhow::Result<()> {
        self.sagas
            .insert((saga_type.to_string(), saga_id.to_string()), entry);
        Ok(())
    }

    fn delete(&self, saga_type: &str, saga_id: &str) -> anyhow::Result<()> {
        self.sagas
            .remove(&(saga_type.to_string(), saga_id.to_string()));
        Ok(())
    }
}
