use std::collections::VecDeque;

use parking_lot::Mutex;

/// Bounded newest-first history.
///
/// A batch (oldest first, as the page records it) is prepended so the most
/// recent record ends up at index 0, then the tail beyond `capacity` is cut.
#[derive(Debug, Default)]
pub struct TelemetryRing<T> {
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
}

impl<T: Clone> TelemetryRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Returns how many records of `batch` survived the cap.
    pub fn merge_batch(&self, batch: Vec<T>) -> usize {
        let incoming = batch.len().min(self.capacity);
        let mut guard = self.queue.lock();
        for record in batch {
            guard.push_front(record);
        }
        guard.truncate(self.capacity);
        incoming
    }

    /// Replaces the contents with `records`, already newest first.
    pub fn restore(&self, records: Vec<T>) {
        let mut guard = self.queue.lock();
        guard.clear();
        guard.extend(records.into_iter().take(self.capacity));
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Newest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.queue.lock().iter().cloned().collect()
    }

    pub fn latest(&self, limit: usize) -> Vec<T> {
        self.queue.lock().iter().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_prepended_newest_first() {
        let ring = TelemetryRing::new(10);
        ring.merge_batch(vec![1, 2]);
        ring.merge_batch(vec![3, 4, 5]);
        assert_eq!(ring.snapshot(), vec![5, 4, 3, 2, 1]);
        assert_eq!(ring.latest(2), vec![5, 4]);
    }

    #[test]
    fn never_exceeds_capacity() {
        let ring = TelemetryRing::new(3);
        for chunk in (0..20).collect::<Vec<_>>().chunks(4) {
            ring.merge_batch(chunk.to_vec());
            assert!(ring.len() <= 3);
        }
        assert_eq!(ring.snapshot(), vec![19, 18, 17]);

        let kept = ring.merge_batch((100..110).collect());
        assert_eq!(kept, 3);
        assert_eq!(ring.snapshot(), vec![109, 108, 107]);
    }

    #[test]
    fn restore_truncates_to_capacity() {
        let ring = TelemetryRing::new(2);
        ring.restore(vec![9, 8, 7]);
        assert_eq!(ring.snapshot(), vec![9, 8]);
        ring.clear();
        assert!(ring.is_empty());
    }
}
