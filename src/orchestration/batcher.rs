// Size-or-time batching of translation items.
//
// A batch flushes when it reaches max_batch_size, or when max_wait has
// elapsed since its first item. The deadline is set by the first item
// only; later items never extend it.

use std::time::{Duration, Instant};

pub struct RequestBatcher<T> {
    max_batch_size: usize,
    max_wait: Duration,
    items: Vec<T>,
    deadline: Option<Instant>,
}

impl<T> RequestBatcher<T> {
    pub fn new(max_batch_size: usize, max_wait: Duration) -> Self {
        assert!(max_batch_size > 0, "batch size must be > 0");
        Self {
            max_batch_size,
            max_wait,
            items: Vec::with_capacity(max_batch_size),
            deadline: None,
        }
    }

    /// Add an item. Returns the pending batch when the size ceiling is hit
    /// or the deadline has passed, whichever comes first.
    pub fn add(&mut self, item: T, now: Instant) -> Option<Vec<T>> {
        if self.items.is_empty() {
            self.deadline = Some(now + self.max_wait);
        }
        self.items.push(item);
        let past_deadline = self.deadline.is_some_and(|deadline| now >= deadline);
        if self.items.len() >= self.max_batch_size || past_deadline {
            return Some(self.take());
        }
        None
    }

    /// Whether the pending batch has outlived its deadline.
    pub fn expired(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) => !self.items.is_empty() && now >= deadline,
            None => false,
        }
    }

    /// Time until the current deadline, if a partial batch is pending.
    pub fn time_until_deadline(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .filter(|_| !self.items.is_empty())
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Flush whatever is pending, regardless of size or deadline.
    pub fn flush(&mut self) -> Option<Vec<T>> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    /// Discard pending items without returning them.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn take(&mut self) -> Vec<T> {
        self.deadline = None;
        std::mem::replace(&mut self.items, Vec::with_capacity(self.max_batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flushes_at_size_ceiling() {
        let mut batcher = RequestBatcher::new(3, Duration::from_millis(200));
        let now = Instant::now();

        assert!(batcher.add("a", now).is_none());
        assert!(batcher.add("b", now).is_none());
        let batch = batcher.add("c", now).expect("size ceiling flush");
        assert_eq!(batch, vec!["a", "b", "c"]);
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_deadline_set_by_first_item_only() {
        let mut batcher = RequestBatcher::new(10, Duration::from_millis(100));
        let t0 = Instant::now();

        batcher.add("a", t0);
        batcher.add("b", t0 + Duration::from_millis(90));

        // Deadline is t0 + 100ms, not extended by the second item
        assert!(!batcher.expired(t0 + Duration::from_millis(99)));
        assert!(batcher.expired(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_flush_returns_partial_batch() {
        let mut batcher = RequestBatcher::new(5, Duration::from_millis(200));
        let now = Instant::now();

        batcher.add(1, now);
        batcher.add(2, now);
        assert_eq!(batcher.flush(), Some(vec![1, 2]));
        assert_eq!(batcher.flush(), None);
    }

    #[test]
    fn test_late_add_flushes_partial_batch() {
        let mut batcher = RequestBatcher::new(10, Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(batcher.add("a", t0).is_none());
        let batch = batcher
            .add("b", t0 + Duration::from_millis(150))
            .expect("deadline flush");
        assert_eq!(batch, vec!["a", "b"]);
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_cancel_discards_pending_items() {
        let mut batcher = RequestBatcher::new(5, Duration::from_millis(200));
        let now = Instant::now();

        batcher.add("x", now);
        batcher.cancel();
        assert!(batcher.is_empty());
        assert_eq!(batcher.flush(), None);
        assert!(!batcher.expired(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_deadline_resets_for_next_batch() {
        let mut batcher = RequestBatcher::new(2, Duration::from_millis(100));
        let t0 = Instant::now();

        batcher.add(1, t0);
        assert!(batcher.add(2, t0).is_some());

        // New batch starts its own deadline from its first item
        let t1 = t0 + Duration::from_millis(500);
        batcher.add(3, t1);
        assert!(!batcher.expired(t1 + Duration::from_millis(99)));
        assert!(batcher.expired(t1 + Duration::from_millis(101)));
    }
}
