//! Message sources consumed by event processors.
//!
//! Two consumption styles exist:
//! - [`SubscribableMessageSource`]: pushes published batches to subscribers
//!   on the publishing thread.
//! - [`StreamableMessageSource`]: lets readers pull events from any position.
//!
//! [`InMemoryEventBus`] implements both and keeps every published event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::message::{EventMessage, TrackedEventMessage, TrackingToken};

/// Callback receiving published batches.
pub type EventConsumer = Arc<dyn Fn(&[EventMessage]) -> anyhow::Result<()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Handle that undoes a subscription when cancelled.
pub struct Registration {
    cancel: Box<dyn FnOnce() + Send + Sync>,
}

impl Registration {
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Source traits
// ---------------------------------------------------------------------------

pub trait SubscribableMessageSource: Send + Sync {
    fn subscribe(&self, consumer: EventConsumer) -> Registration;
}

pub trait StreamableMessageSource: Send + Sync {
    /// Reads up to `max` events positioned after `after` (`None` = from the
    /// beginning), in token order.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn read_events(
        &self,
        after: Option<TrackingToken>,
        max: usize,
    ) -> anyhow::Result<Vec<TrackedEventMessage>>;

    /// Token of the most recent event, `None` when the source is empty.
    fn head_token(&self) -> Option<TrackingToken>;
}

/// A publishable source usable both ways. The configuration's event bus.
pub trait EventBus: SubscribableMessageSource + StreamableMessageSource {
    /// Publishes `events` and delivers them to all subscribers.
    ///
    /// # Errors
    ///
    /// The first error returned by a subscriber.
    fn publish(&self, events: Vec<EventMessage>) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// InMemoryEventBus
// ---------------------------------------------------------------------------

/// Event bus retaining every published event in memory.
#[derive(Default)]
pub struct InMemoryEventBus {
    log: RwLock<Vec<TrackedEventMessage>>,
    subscribers: Arc<RwLock<Vec<(u64, EventConsumer)>>>,
    next_subscriber: AtomicU64,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events published so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.read().is_empty()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl SubscribableMessageSource for InMemoryEventBus {
    fn subscribe(&self, consumer: EventConsumer) -> Registration {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, consumer));
        let subscribers: Weak<RwLock<Vec<(u64, EventConsumer)>>> =
            Arc::downgrade(&self.subscribers);
        Registration::new(move || {
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers.write().retain(|(sid, _)| *sid != id);
            }
        })
    }
}

impl StreamableMessageSource for InMemoryEventBus {
    fn read_events(
        &self,
        after: Option<TrackingToken>,
        max: usize,
    ) -> anyhow::Result<Vec<TrackedEventMessage>> {
        let log = self.log.read();
        let start = after.map_or(0, |token| {
            usize::try_from(token.index()).map_or(usize::MAX, |index| index.saturating_add(1))
        });
        Ok(log.iter().skip(start).take(max).cloned().collect())
    }

    fn head_token(&self) -> Option<TrackingToken> {
        self.log.read().last().map(|tracked| tracked.token)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, events: Vec<EventMessage>) -> anyhow::Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        {
            let mut log = self.log.write();
            for message in &events {
                let token = TrackingToken(log.len() as u64);
                log.push(TrackedEventMessage {
                    token,
                    message: message.clone(),
                });
            }
        }
        // Snapshot so consumers may subscribe or unsubscribe while handling.
        let subscribers: Vec<EventConsumer> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, consumer)| consumer.clone())
            .collect();
        for consumer in subscribers {
            consumer(&events)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::Value;

    use super::*;

    fn event(name: &str) -> EventMessage {
        EventMessage::new(name, Value::Null)
    }

    #[test]
    fn publish_assigns_sequential_tokens() {
        let bus = InMemoryEventBus::new();
        bus.publish(vec![event("a"), event("b")]).unwrap();
        bus.publish(vec![event("c")]).unwrap();

        let all = bus.read_events(None, 10).unwrap();
        let tokens: Vec<u64> = all.iter().map(|t| t.token.index()).collect();
        assert_eq!(tokens, vec![0, 1, 2]);
        assert_eq!(bus.head_token(), Some(TrackingToken(2)));
    }

    #[test]
    fn read_after_token_respects_max() {
        let bus = InMemoryEventBus::new();
        bus.publish(vec![event("a"), event("b"), event("c"), event("d")]).unwrap();

        let page = bus.read_events(Some(TrackingToken(0)), 2).unwrap();
        let names: Vec<&str> = page.iter().map(|t| t.message.payload_type.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(bus.read_events(Some(TrackingToken(3)), 5).unwrap().is_empty());
    }

    #[test]
    fn subscribers_receive_batches_until_cancelled() {
        let bus = InMemoryEventBus::new();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        let registration = bus.subscribe(Arc::new(
            move |events: &[EventMessage]| -> anyhow::Result<()> {
                counter.fetch_add(events.len(), Ordering::SeqCst);
                Ok(())
            },
        ));

        bus.publish(vec![event("a"), event("b")]).unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 2);

        registration.cancel();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(vec![event("c")]).unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscriber_error_reaches_publisher() {
        let bus = InMemoryEventBus::new();
        let _registration = bus.subscribe(Arc::new(|_: &[EventMessage]| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("rejected"))
        }));
        let err = bus.publish(vec![event("a")]).unwrap_err();
        assert_eq!(err.to_string(), "rejected");
        assert_eq!(bus.len(), 1);
    }
}
