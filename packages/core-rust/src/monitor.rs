//! Message monitors observe ingestion and outcome of every processed message.

use std::time::Instant;

use crate::message::EventMessage;

/// Receives the outcome of one ingested message. Exactly one `report_*`
/// method is called.
pub trait MonitorCallback: Send {
    fn report_success(self: Box<Self>);

    fn report_failure(self: Box<Self>, error: &anyhow::Error);

    fn report_ignored(self: Box<Self>);
}

pub trait MessageMonitor: Send + Sync {
    fn on_message_ingested(&self, message: &EventMessage) -> Box<dyn MonitorCallback>;
}

// ---------------------------------------------------------------------------
// NoOpMessageMonitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMessageMonitor;

struct NoOpCallback;

impl MonitorCallback for NoOpCallback {
    fn report_success(self: Box<Self>) {}

    fn report_failure(self: Box<Self>, _error: &anyhow::Error) {}

    fn report_ignored(self: Box<Self>) {}
}

impl MessageMonitor for NoOpMessageMonitor {
    fn on_message_ingested(&self, _message: &EventMessage) -> Box<dyn MonitorCallback> {
        Box::new(NoOpCallback)
    }
}

// ---------------------------------------------------------------------------
// MetricsMessageMonitor
// ---------------------------------------------------------------------------

/// Records message counts and processing time through the `metrics` facade.
///
/// Emits `flowline_messages_total{component, outcome}` and
/// `flowline_message_duration_seconds{component}`. Nothing is recorded unless
/// the application installs a `metrics` recorder.
#[derive(Debug, Clone)]
pub struct MetricsMessageMonitor {
    component: String,
}

impl MetricsMessageMonitor {
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }
}

struct MetricsCallback {
    component: String,
    started: Instant,
}

impl MetricsCallback {
    fn record(self, outcome: &'static str) {
        metrics::counter!(
            "flowline_messages_total",
            "component" => self.component.clone(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!(
            "flowline_message_duration_seconds",
            "component" => self.component
        )
        .record(self.started.elapsed().as_secs_f64());
    }
}

impl MonitorCallback for MetricsCallback {
    fn report_success(self: Box<Self>) {
        (*self).record("success");
    }

    fn report_failure(self: Box<Self>, _error: &anyhow::Error) {
        (*self).record("failure");
    }

    fn report_ignored(self: Box<Self>) {
        (*self).record("ignored");
    }
}

impl MessageMonitor for MetricsMessageMonitor {
    fn on_message_ingested(&self, _message: &EventMessage) -> Box<dyn MonitorCallback> {
        Box::new(MetricsCallback {
            component: self.component.clone(),
            started: Instant::now(),
        })
    }
}
