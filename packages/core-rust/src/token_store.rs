//! Persistence of processing progress.
//!
//! A token store keeps, per processor and segment, the tracking token of the
//! last event that was handled. Durable implementations live outside this
//! workspace; [`InMemoryTokenStore`] is the default and forgets everything on
//! restart.

use dashmap::DashMap;

use crate::handler::AsAny;
use crate::message::TrackingToken;

pub trait TokenStore: AsAny {
    /// Creates `segment_count` segments for `processor`, all positioned at
    /// `initial` (`None` = before the first event).
    ///
    /// # Errors
    ///
    /// Fails if segments already exist for the processor.
    fn initialize_token_segments(
        &self,
        processor: &str,
        segment_count: u32,
        initial: Option<TrackingToken>,
    ) -> anyhow::Result<()>;

    /// Stores the position of `segment`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn store_token(
        &self,
        processor: &str,
        segment: u32,
        token: TrackingToken,
    ) -> anyhow::Result<()>;

    /// Returns the stored position of `segment`.
    ///
    /// # Errors
    ///
    /// Fails if the segment was never initialized.
    fn fetch_token(&self, processor: &str, segment: u32) -> anyhow::Result<Option<TrackingToken>>;

    /// Returns the initialized segment ids of `processor`, ascending.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn fetch_segments(&self, processor: &str) -> anyhow::Result<Vec<u32>>;
}

// ---------------------------------------------------------------------------
// InMemoryTokenStore
// ---------------------------------------------------------------------------

/// Non-persistent token store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: DashMap<(String, u32), Option<TrackingToken>>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn initialize_token_segments(
        &self,
        processor: &str,
        segment_count: u32,
        initial: Option<TrackingToken>,
    ) -> anyhow::Result<()> {
        if !self.fetch_segments(processor)?.is_empty() {
            anyhow::bail!("token segments for processor '{processor}' already exist");
        }
        for segment in 0..segment_count {
            self.tokens.insert((processor.to_string(), segment), initial);
        }
        Ok(())
    }

    fn store_token(
        &self,
        processor: &str,
        segment: u32,
        token: TrackingToken,
    ) -> anyhow::Result<()> {
        self.tokens.insert((processor.to_string(), segment), Some(token));
        Ok(())
    }

    fn fetch_token(&self, processor: &str, segment: u32) -> anyhow::Result<Option<TrackingToken>> {
        self.tokens
            .get(&(processor.to_string(), segment))
            .map(|entry| *entry.value())
            .ok_or_else(|| {
                anyhow::anyhow!("no token for processor '{processor}' segment {segment}")
            })
    }

    fn fetch_segments(&self, processor: &str) -> anyhow::Result<Vec<u32>> {
        let mut segments: Vec<u32> = self
            .tokens
            .iter()
            .filter(|entry| entry.key().0 == processor)
            .map(|entry| entry.key().1)
            .collect();
        segments.sort_unstable();
        Ok(segments)
    }
}
