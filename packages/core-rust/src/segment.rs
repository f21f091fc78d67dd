//! Segments: disjoint slices of the sequence-identifier key space.
//!
//! A tracking processor runs one worker per segment. Events are routed by
//! hashing their sequence identifier, so all events sharing an identifier are
//! always handled by the same segment and therefore in order.

use serde::{Deserialize, Serialize};

use crate::hash::fnv1a_hash;

/// A slice of the key space, defined by `hash & mask == segment_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    segment_id: u32,
    mask: u32,
}

impl Segment {
    /// The segment covering the whole key space.
    pub const ROOT: Segment = Segment {
        segment_id: 0,
        mask: 0,
    };

    /// Creates a segment. `mask` must be `2^n - 1` and `segment_id <= mask`.
    #[must_use]
    pub fn new(segment_id: u32, mask: u32) -> Self {
        debug_assert!(segment_id <= mask, "segment id outside of mask");
        Self { segment_id, mask }
    }

    /// Splits the key space into `count` segments, rounded up to the next
    /// power of two. A count of zero yields the root segment only.
    #[must_use]
    pub fn split_into(count: u32) -> Vec<Segment> {
        let total = count.max(1).next_power_of_two();
        let mask = total - 1;
        (0..total).map(|id| Segment::new(id, mask)).collect()
    }

    #[must_use]
    pub fn segment_id(self) -> u32 {
        self.segment_id
    }

    #[must_use]
    pub fn mask(self) -> u32 {
        self.mask
    }

    /// Whether `key` belongs to this segment.
    #[must_use]
    pub fn matches(self, key: &str) -> bool {
        self.mask == 0 || fnv1a_hash(key) & self.mask == self.segment_id
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::ROOT
    }
}
