//! Observation timestamps.
//!
//! An `ObservedAt` records when the core accepted a record, not when the
//! server created it. It combines wall-clock milliseconds with a logical
//! counter so that two batches accepted within the same millisecond still
//! order strictly.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// The moment a batch of records was accepted by the core.
///
/// Ordered by `wall_time`, then `logical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservedAt {
    /// Milliseconds since the Unix epoch.
    wall_time: u64,
    /// Tie-breaker for observations within the same millisecond.
    logical: u32,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl ObservedAt {
    /// The earliest possible observation.
    pub const EPOCH: Self = Self::new(0, 0);

    /// Creates an observation stamp at the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            wall_time: now_millis(),
            logical: 0,
        }
    }

    /// Creates a stamp from components.
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Returns the wall time component.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Produces the next stamp, strictly greater than `self`.
    ///
    /// Follows the wall clock when it has moved forward, otherwise bumps the
    /// logical counter. A clock that steps backwards never produces an
    /// earlier stamp.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = now_millis();
        if now > self.wall_time {
            Self {
                wall_time: now,
                logical: 0,
            }
        } else if self.logical == u32::MAX {
            Self {
                wall_time: self.wall_time + 1,
                logical: 0,
            }
        } else {
            Self {
                wall_time: self.wall_time,
                logical: self.logical + 1,
            }
        }
    }

    /// Returns true if this stamp is before the other.
    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self < other
    }

    /// Returns true if this stamp is after the other.
    #[must_use]
    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }
}

impl Default for ObservedAt {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for ObservedAt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObservedAt {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.wall_time.cmp(&other.wall_time) {
            Ordering::Equal => self.logical.cmp(&other.logical),
            other => other,
        }
    }
}
