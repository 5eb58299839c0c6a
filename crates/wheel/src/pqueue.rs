//! Index-addressable binary min-heap.
//!
//! Plain sift-up/sift-down over a `Vec`, ordered by the timestamp each
//! item reports. Unlike the standard library heap it supports direct index
//! access and index removal, which the scheduler needs for non-consuming
//! snapshots and for cancel-by-scan. Items with equal timestamps have
//! unspecified relative order; the heap is not FIFO for ties.

use chrono::{DateTime, Utc};

/// Yields the timestamp an item is ordered by. Implemented by jobs
/// (trigger time) and bucket handles (window start).
pub trait Prioritized {
    fn priority(&self) -> DateTime<Utc>;
}

#[derive(Debug)]
pub struct PriorityQueue<T: Prioritized> {
    items: Vec<T>,
}

impl<T: Prioritized> PriorityQueue<T> {
    pub fn new() -> PriorityQueue<T> {
        PriorityQueue { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// O(log n).
    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    /// Remove and return the minimum. O(log n).
    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let out = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        out
    }

    /// The minimum without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Direct access by heap-array position; ordering across positions is
    /// arbitrary apart from position 0 being the minimum.
    pub fn at(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Heap-array position of the first item matching `pred`. Linear scan;
    /// this is the slow half of cancel-by-id.
    pub fn position<F: FnMut(&T) -> bool>(&self, pred: F) -> Option<usize> {
        self.items.iter().position(pred)
    }

    /// Remove the item at a heap-array position, restoring heap order.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.items.len() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(index, last);
        let out = self.items.pop();
        if index < self.items.len() {
            // The swapped-in item may belong above or below its new slot.
            if index > 0
                && self.items[index].priority() < self.items[(index - 1) / 2].priority()
            {
                self.sift_up(index);
            } else {
                self.sift_down(index);
            }
        }
        out
    }

    /// Keep only items matching `pred`, then restore heap order.
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, pred: F) {
        self.items.retain(pred);
        self.reheapify();
    }

    /// Arbitrary-order walk over the live items.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Re-establish the heap property over the whole array.
    pub fn reheapify(&mut self) {
        for i in (0..self.items.len() / 2).rev() {
            self.sift_down(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.items[i].priority() < self.items[parent].priority() {
                self.items.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < len && self.items[left].priority() < self.items[smallest].priority() {
                smallest = left;
            }
            if right < len && self.items[right].priority() < self.items[smallest].priority() {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.items.swap(i, smallest);
            i = smallest;
        }
    }
}

impl<T: Prioritized> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, PartialEq)]
    struct Item {
        at: DateTime<Utc>,
        tag: &'static str,
    }

    impl Prioritized for Item {
        fn priority(&self) -> DateTime<Utc> {
            self.at
        }
    }

    fn item(ms: i64, tag: &'static str) -> Item {
        Item {
            at: Utc.timestamp_millis_opt(ms).single().unwrap(),
            tag,
        }
    }

    fn drain_tags(q: &mut PriorityQueue<Item>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Some(i) = q.pop() {
            out.push(i.tag);
        }
        out
    }

    #[test]
    fn pops_in_timestamp_order() {
        let mut q = PriorityQueue::new();
        for (ms, tag) in [(50, "c"), (10, "a"), (90, "d"), (30, "b"), (120, "e")] {
            q.push(item(ms, tag));
        }
        assert_eq!(q.peek().map(|i| i.tag), Some("a"));
        assert_eq!(drain_tags(&mut q), ["a", "b", "c", "d", "e"]);
        assert!(q.is_empty());
    }

    #[test]
    fn remove_by_index_preserves_heap_order() {
        let mut q = PriorityQueue::new();
        for ms in [40, 10, 70, 20, 90, 60] {
            q.push(item(ms, "x"));
        }
        let victim = q.position(|i| i.at.timestamp_millis() == 20).unwrap();
        let removed = q.remove(victim).unwrap();
        assert_eq!(removed.at.timestamp_millis(), 20);

        let times: Vec<i64> = std::iter::from_fn(|| q.pop())
            .map(|i| i.at.timestamp_millis())
            .collect();
        assert_eq!(times, [10, 40, 60, 70, 90]);
    }

    #[test]
    fn remove_out_of_range_is_none() {
        let mut q = PriorityQueue::new();
        q.push(item(5, "only"));
        assert!(q.remove(3).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn indexed_access_sees_every_item() {
        let mut q = PriorityQueue::new();
        for ms in [3, 1, 2] {
            q.push(item(ms, "x"));
        }
        let mut seen: Vec<i64> = (0..q.len())
            .filter_map(|i| q.at(i))
            .map(|i| i.at.timestamp_millis())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, [1, 2, 3]);
        assert!(q.at(3).is_none());
    }

    #[test]
    fn retain_then_pop_stays_sorted() {
        let mut q = PriorityQueue::new();
        for ms in [5, 25, 15, 35, 45] {
            q.push(item(ms, "x"));
        }
        q.retain(|i| i.at.timestamp_millis() % 10 == 5 && i.at.timestamp_millis() > 10);
        let times: Vec<i64> = std::iter::from_fn(|| q.pop())
            .map(|i| i.at.timestamp_millis())
            .collect();
        assert_eq!(times, [15, 25, 35, 45]);
    }

    #[test]
    fn reheapify_is_idempotent_on_a_valid_heap() {
        let mut q = PriorityQueue::new();
        for ms in [9, 4, 7, 1, 8] {
            q.push(item(ms, "x"));
        }
        q.reheapify();
        assert_eq!(q.peek().map(|i| i.at.timestamp_millis()), Some(1));
        let times: Vec<i64> = std::iter::from_fn(|| q.pop())
            .map(|i| i.at.timestamp_millis())
            .collect();
        assert_eq!(times, [1, 4, 7, 8, 9]);
    }
}
