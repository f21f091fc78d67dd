//! Mapping of processing groups to event processor names.

use std::collections::HashMap;
use std::sync::Arc;

/// Derives a processor name from a processing group.
pub type NamingRule = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Resolves the processor a processing group belongs to: an explicit
/// assignment when present, else the naming rule (identity by default).
pub struct ProcessorNameResolver {
    assignments: HashMap<String, String>,
    rule: NamingRule,
}

impl ProcessorNameResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            assignments: HashMap::new(),
            rule: Arc::new(str::to_string),
        }
    }

    /// Assigns `processing_group` to `processor_name`, replacing any earlier
    /// assignment of that group.
    pub fn assign(
        &mut self,
        processing_group: impl Into<String>,
        processor_name: impl Into<String>,
    ) {
        self.assignments.insert(processing_group.into(), processor_name.into());
    }

    pub fn set_rule(&mut self, rule: NamingRule) {
        self.rule = rule;
    }

    #[must_use]
    pub fn resolve(&self, processing_group: &str) -> String {
        self.assignments
            .get(processing_group)
            .cloned()
            .unwrap_or_else(|| (self.rule)(processing_group))
    }
}

impl Default for ProcessorNameResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_by_default() {
        let resolver = ProcessorNameResolver::new();
        assert_eq!(resolver.resolve("orders"), "orders");
    }

    #[test]
    fn explicit_assignment_beats_rule() {
        let mut resolver = ProcessorNameResolver::new();
        resolver.set_rule(Arc::new(|group: &str| format!("{group}-processor")));
        resolver.assign("orders", "main");

        assert_eq!(resolver.resolve("orders"), "main");
        assert_eq!(resolver.resolve("billing"), "billing-processor");
    }

    #[test]
    fn latest_assignment_wins() {
        let mut resolver = ProcessorNameResolver::new();
        resolver.assign("orders", "a");
        resolver.assign("orders", "b");
        assert_eq!(resolver.resolve("orders"), "b");
    }
}
