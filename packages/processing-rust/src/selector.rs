//! Assignment of event handlers to processing groups.
//!
//! Selectors are consulted from the highest priority down; the first one that
//! matches names the handler's group. A handler no selector matches falls back
//! to its declared group, and without one to the fallback assignment (the
//! handler's namespace unless configured otherwise).

use std::cmp::Reverse;
use std::sync::Arc;

use flowline_core::handler::EventHandler;
use tracing::debug;

/// Predicate deciding whether a selector applies to a handler.
pub type HandlerPredicate = Arc<dyn Fn(&dyn EventHandler) -> bool + Send + Sync>;

/// Names the group of a handler no selector claimed.
pub type AssignmentFunction = Arc<dyn Fn(&dyn EventHandler) -> String + Send + Sync>;

/// Priority used by selectors registered without one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// One selector rule: `predicate` matching a handler assigns it to `group`.
#[derive(Clone)]
pub struct ProcessorSelector {
    priority: i32,
    processing_group: String,
    predicate: HandlerPredicate,
}

impl ProcessorSelector {
    pub fn new(
        processing_group: impl Into<String>,
        priority: i32,
        predicate: impl Fn(&dyn EventHandler) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            priority,
            processing_group: processing_group.into(),
            predicate: Arc::new(predicate),
        }
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn processing_group(&self) -> &str {
        &self.processing_group
    }

    /// The group this selector assigns `handler` to, if it matches.
    #[must_use]
    pub fn select(&self, handler: &dyn EventHandler) -> Option<&str> {
        (self.predicate)(handler).then_some(self.processing_group.as_str())
    }
}

impl std::fmt::Debug for ProcessorSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorSelector")
            .field("priority", &self.priority)
            .field("processing_group", &self.processing_group)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SelectorChain
// ---------------------------------------------------------------------------

/// Priority-ordered selectors plus the total default selector.
pub struct SelectorChain {
    selectors: Vec<ProcessorSelector>,
    fallback: AssignmentFunction,
}

impl SelectorChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            selectors: Vec::new(),
            fallback: Arc::new(|handler: &dyn EventHandler| handler.namespace()),
        }
    }

    pub fn add(&mut self, selector: ProcessorSelector) {
        self.selectors.push(selector);
    }

    /// Replaces the assignment used when neither a selector nor a declared
    /// group applies.
    pub fn set_fallback(&mut self, fallback: AssignmentFunction) {
        self.fallback = fallback;
    }

    /// Orders selectors by descending priority. Equal priorities keep their
    /// registration order.
    pub fn sort(&mut self) {
        self.selectors.sort_by_key(|selector| Reverse(selector.priority));
    }

    #[must_use]
    pub fn selectors(&self) -> &[ProcessorSelector] {
        &self.selectors
    }

    /// Resolves the processing group of `handler`. Always yields a group.
    #[must_use]
    pub fn select(&self, handler: &dyn EventHandler) -> String {
        if let Some(group) = self.selectors.iter().find_map(|selector| selector.select(handler)) {
            debug!(handler = handler.type_name(), group, "handler assigned by selector");
            return group.to_string();
        }
        let group = handler
            .declared_processing_group()
            .map_or_else(|| (self.fallback)(handler), str::to_string);
        debug!(
            handler = handler.type_name(),
            group = %group,
            "handler assigned by default selector"
        );
        group
    }
}

impl Default for SelectorChain {
    fn default() -> Self {
        Self::new()
    }
}
