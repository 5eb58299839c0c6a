//! Fast pre-check for duplicate adds and cancels of unknown ids.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Counting fingerprint set over live job ids.
///
/// Each id is stored as a 64-bit hash with a refcount, so membership costs
/// twelve bytes regardless of id length. `may_contain` can answer a false
/// positive when two ids collide on a fingerprint; it can never answer a
/// false negative, because a fingerprint stays counted until every id that
/// mapped to it is removed. A hit therefore only licenses the caller to run
/// the authoritative ownership scan, never to reject outright.
#[derive(Debug, Default)]
pub struct ExistenceFilter {
    counts: HashMap<u64, u32>,
}

impl ExistenceFilter {
    pub fn new() -> ExistenceFilter {
        ExistenceFilter::default()
    }

    fn fingerprint(id: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        hasher.finish()
    }

    /// Definitely-absent check: `false` is authoritative, `true` is not.
    pub fn may_contain(&self, id: &str) -> bool {
        self.counts.contains_key(&Self::fingerprint(id))
    }

    pub fn add(&mut self, id: &str) {
        *self.counts.entry(Self::fingerprint(id)).or_insert(0) += 1;
    }

    pub fn remove(&mut self, id: &str) {
        match self.counts.entry(Self::fingerprint(id)) {
            Entry::Occupied(mut entry) => {
                if *entry.get() <= 1 {
                    entry.remove();
                } else {
                    *entry.get_mut() -= 1;
                }
            }
            Entry::Vacant(_) => {
                // Add and remove are paired by the hub; an unknown removal
                // means that pairing broke somewhere upstream.
                tracing::warn!(job_id = %id, "existence filter removal for an id it never saw");
            }
        }
    }

    /// Number of distinct fingerprints currently held.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_until_added_then_absent_again() {
        let mut filter = ExistenceFilter::new();
        assert!(!filter.may_contain("alpha"));
        filter.add("alpha");
        assert!(filter.may_contain("alpha"));
        filter.remove("alpha");
        assert!(!filter.may_contain("alpha"));
        assert!(filter.is_empty());
    }

    #[test]
    fn colliding_entries_need_matched_removals() {
        // Same id twice models a fingerprint collision: one removal must
        // not erase the other holder's membership.
        let mut filter = ExistenceFilter::new();
        filter.add("shared");
        filter.add("shared");
        filter.remove("shared");
        assert!(
            filter.may_contain("shared"),
            "refcounted fingerprint must survive a single removal"
        );
        filter.remove("shared");
        assert!(!filter.may_contain("shared"));
    }

    #[test]
    fn unknown_removal_is_tolerated() {
        let mut filter = ExistenceFilter::new();
        filter.add("kept");
        filter.remove("never-added");
        assert!(filter.may_contain("kept"));
        assert_eq!(filter.len(), 1);
    }
}
