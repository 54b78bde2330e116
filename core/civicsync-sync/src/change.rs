//! Change detection between two snapshots.
//!
//! Transport-agnostic and pure: the coordinator uses the result only to
//! decide whether to raise a notification and what it should say.

use civicsync_types::{CollectionSnapshot, Entity};
use serde::Serialize;

/// What is new in `current` relative to `previous`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSummary {
    /// Entities whose id was absent from `previous`.
    pub new_count: usize,
    /// The most recently observed new entity.
    pub newest: Option<Entity>,
}

impl ChangeSummary {
    #[must_use]
    pub fn has_new(&self) -> bool {
        self.new_count > 0
    }
}

/// Computes new-since-last-observation summaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    /// Compares two snapshots.
    ///
    /// An entity is new when its id is not in `previous`. `newest` is the new
    /// entity with the greatest `observed_at` (unstamped entities rank
    /// lowest); on ties the first in `current`'s order wins.
    #[must_use]
    pub fn diff(previous: &CollectionSnapshot, current: &CollectionSnapshot) -> ChangeSummary {
        let known = previous.ids();
        let mut new_count = 0;
        let mut newest: Option<&Entity> = None;

        for entity in current.entities.iter().filter(|e| !known.contains(&e.id)) {
            new_count += 1;
            let replaces = match newest {
                None => true,
                Some(best) => entity.observed_at > best.observed_at,
            };
            if replaces {
                newest = Some(entity);
            }
        }

        ChangeSummary {
            new_count,
            newest: newest.cloned(),
        }
    }
}
