//! Processor pulling events from a streamable source on Tokio tasks.
//!
//! The event stream is split into segments; each segment is worked by its own
//! task, which:
//! 1. Fetches the segment's token from the token store
//! 2. Reads the next batch after that token
//! 3. Processes the batch (events outside the segment are ignored)
//! 4. Stores the token of the batch's last event
//!
//! A caught-up or failing worker idles for the poll interval. A failed batch
//! leaves the token in place, so it is retried.

use std::sync::Arc;
use std::time::Duration;

use flowline_core::interceptor::MessageHandlerInterceptor;
use flowline_core::invoker::EventHandlerInvoker;
use flowline_core::message::EventMessage;
use flowline_core::segment::Segment;
use flowline_core::source::StreamableMessageSource;
use flowline_core::token_store::TokenStore;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pipeline::ProcessingPipeline;
use super::EventProcessor;
use crate::config::{InitialPosition, TrackingProcessorSettings};
use crate::context::ProcessingContext;
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// SegmentWorker
// ---------------------------------------------------------------------------

struct SegmentWorker {
    pipeline: Arc<ProcessingPipeline>,
    source: Arc<dyn StreamableMessageSource>,
    token_store: Arc<dyn TokenStore>,
    segment: Segment,
    batch_size: usize,
}

impl SegmentWorker {
    /// Processes the next batch. Returns `false` when there was nothing to read.
    fn process_next_batch(&self) -> anyhow::Result<bool> {
        let name = self.pipeline.processor_name();
        let token = self.token_store.fetch_token(name, self.segment.segment_id())?;
        let batch = self.source.read_events(token, self.batch_size)?;
        let Some(last) = batch.last().map(|tracked| tracked.token) else {
            return Ok(false);
        };
        let events: Vec<EventMessage> = batch.into_iter().map(|tracked| tracked.message).collect();
        self.pipeline.process_batch(&events, self.segment)?;
        self.token_store.store_token(name, self.segment.segment_id(), last)?;
        Ok(true)
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>, poll_interval: Duration) {
        debug!(
            processor = %self.pipeline.processor_name(),
            segment = self.segment.segment_id(),
            "segment worker started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.process_next_batch() {
                Ok(processed) => !processed,
                Err(error) => {
                    warn!(
                        processor = %self.pipeline.processor_name(),
                        segment = self.segment.segment_id(),
                        error = %error,
                        "batch failed; retrying after poll interval"
                    );
                    true
                }
            };
            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break; // Processor dropped.
                        }
                    }
                    () = tokio::time::sleep(poll_interval) => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
        debug!(
            processor = %self.pipeline.processor_name(),
            segment = self.segment.segment_id(),
            "segment worker stopped"
        );
    }
}

// ---------------------------------------------------------------------------
// TrackingEventProcessor
// ---------------------------------------------------------------------------

struct Workers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Tracks its own position in a [`StreamableMessageSource`], one worker task
/// per segment.
pub struct TrackingEventProcessor {
    pipeline: Arc<ProcessingPipeline>,
    source: Arc<dyn StreamableMessageSource>,
    token_store: Arc<dyn TokenStore>,
    settings: TrackingProcessorSettings,
    workers: Mutex<Option<Workers>>,
    stopping: Mutex<Vec<JoinHandle<()>>>,
}

impl TrackingEventProcessor {
    pub const COMPONENT_TYPE: &'static str = "TrackingEventProcessor";

    /// Creates the processor with the token store resolved for `name`.
    #[must_use]
    pub fn new(
        name: &str,
        invoker: Arc<dyn EventHandlerInvoker>,
        source: Arc<dyn StreamableMessageSource>,
        settings: TrackingProcessorSettings,
        context: &ProcessingContext,
    ) -> Self {
        Self {
            pipeline: Arc::new(ProcessingPipeline::new(
                name,
                Self::COMPONENT_TYPE,
                invoker,
                context,
            )),
            source,
            token_store: context.token_store(name),
            settings,
            workers: Mutex::new(None),
            stopping: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &TrackingProcessorSettings {
        &self.settings
    }

    #[must_use]
    pub fn token_store(&self) -> Arc<dyn TokenStore> {
        self.token_store.clone()
    }

    /// Number of running segment workers.
    #[must_use]
    pub fn active_segments(&self) -> usize {
        self.workers
            .lock()
            .as_ref()
            .map_or(0, |workers| workers.handles.len())
    }

    /// Waits until the workers of the last shutdown have exited. Until they
    /// have, [`start`](EventProcessor::start) fails with
    /// [`ConfigError::StillStopping`].
    pub async fn await_termination(&self) {
        let handles = std::mem::take(&mut *self.stopping.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    // Initializes the token segments on first start.
    fn claim_segments(&self) -> anyhow::Result<Vec<Segment>> {
        let name = self.pipeline.processor_name();
        let mut ids = self.token_store.fetch_segments(name)?;
        if ids.is_empty() {
            let count = self.settings.segment_count.max(1).next_power_of_two();
            let initial = match self.settings.initial_position {
                InitialPosition::Tail => None,
                InitialPosition::Head => self.source.head_token(),
            };
            self.token_store.initialize_token_segments(name, count, initial)?;
            ids = self.token_store.fetch_segments(name)?;
        }
        let count = u32::try_from(ids.len())?;
        let contiguous = ids.iter().copied().eq(0..count);
        if !count.is_power_of_two() || !contiguous {
            anyhow::bail!(
                "token store holds segments {ids:?} for [{name}]; \
                 expected ids 0..n with n a power of two"
            );
        }
        Ok(ids.into_iter().map(|id| Segment::new(id, count - 1)).collect())
    }
}

impl EventProcessor for TrackingEventProcessor {
    fn name(&self) -> &str {
        self.pipeline.processor_name()
    }

    fn register_handler_interceptor(&self, interceptor: Arc<dyn MessageHandlerInterceptor>) {
        self.pipeline.register_interceptor(interceptor);
    }

    fn handler_interceptors(&self) -> Vec<Arc<dyn MessageHandlerInterceptor>> {
        self.pipeline.interceptors()
    }

    fn event_handler_invoker(&self) -> Arc<dyn EventHandlerInvoker> {
        self.pipeline.invoker()
    }

    fn start(&self) -> anyhow::Result<()> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime {
            name: self.name().to_string(),
        })?;
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Ok(());
        }
        {
            let mut stopping = self.stopping.lock();
            stopping.retain(|handle| !handle.is_finished());
            if !stopping.is_empty() {
                return Err(ConfigError::StillStopping {
                    name: self.name().to_string(),
                }
                .into());
            }
        }

        let segments = self.claim_segments()?;
        let (shutdown, receiver) = watch::channel(false);
        let poll_interval = self.settings.poll_interval();
        let handles: Vec<JoinHandle<()>> = segments
            .into_iter()
            .map(|segment| {
                let worker = SegmentWorker {
                    pipeline: self.pipeline.clone(),
                    source: self.source.clone(),
                    token_store: self.token_store.clone(),
                    segment,
                    batch_size: self.settings.batch_size.max(1),
                };
                runtime.spawn(worker.run(receiver.clone(), poll_interval))
            })
            .collect();

        info!(
            processor = %self.name(),
            segments = handles.len(),
            "tracking event processor started"
        );
        *workers = Some(Workers { shutdown, handles });
        Ok(())
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        let Some(workers) = self.workers.lock().take() else {
            return Ok(());
        };
        // Receivers may already be gone if every worker exited.
        let _ = workers.shutdown.send(true);
        self.stopping.lock().extend(workers.handles);
        info!(processor = %self.name(), "tracking event processor stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.workers.lock().is_some()
    }
}

impl std::fmt::Debug for TrackingEventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingEventProcessor")
            .field("name", &self.pipeline.processor_name())
            .field("settings", &self.settings)
            .field("active_segments", &self.active_segments())
            .finish_non_exhaustive()
    }
}
