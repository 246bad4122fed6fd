use std::collections::VecDeque;

use parking_lot::Mutex;

/// Fixed-capacity double-ended queue shared by producers and the
/// writer drain loop.
///
/// DESIGN:
/// - Producers push whole batches to the front
/// - The drain loop pops the oldest items from the back
/// - One mutex guards the sequence; nothing ever waits on it
///   longer than a copy
///
/// BACKPRESSURE:
/// - A batch that does not fit is rejected in full
/// - The caller gets `false` and owns the failure accounting
/// - Nothing blocks, nothing is partially admitted
///
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admits every item or none of them.
    pub fn push_many(&self, batch: Vec<T>) -> bool {
        let mut items = self.items.lock();

        if items.len() + batch.len() > self.capacity {
            return false;
        }

        for item in batch {
            items.push_front(item);
        }
        true
    }

    /// Removes up to `n` of the oldest items, oldest first.
    ///
    /// Returns an empty vector when the queue is empty. Never waits.
    pub fn pop_back_n(&self, n: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let take = n.min(items.len());

        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            match items.pop_back() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn push_that_overflows_admits_nothing() {
        let q = BoundedQueue::new(5);
        assert!(q.push_many(vec![1, 2, 3]));
        assert!(!q.push_many(vec![4, 5, 6]));
        assert_eq!(q.len(), 3);

        // exactly filling is fine
        assert!(q.push_many(vec![4, 5]));
        assert_eq!(q.len(), 5);
        assert!(!q.push_many(vec![6]));
    }

    #[test]
    fn pops_oldest_first_across_batches() {
        let q = BoundedQueue::new(10);
        q.push_many(vec![1, 2, 3]);
        q.push_many(vec![4, 5]);

        assert_eq!(q.pop_back_n(2), vec![1, 2]);
        assert_eq!(q.pop_back_n(10), vec![3, 4, 5]);
        assert!(q.pop_back_n(3).is_empty());
        assert!(q.is_empty());
    }

    #[test]
    fn empty_batch_always_fits() {
        let q: BoundedQueue<u8> = BoundedQueue::new(0);
        assert!(q.push_many(Vec::new()));
        assert!(!q.push_many(vec![1]));
    }

    #[test]
    fn length_never_exceeds_capacity_under_contention() {
        let q = Arc::new(BoundedQueue::new(64));
        let mut handles = Vec::new();

        for t in 0..4 {
            let q = q.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    if (i + t) % 3 == 0 {
                        q.pop_back_n(7);
                    } else {
                        q.push_many(vec![i; (i % 9) + 1]);
                    }
                    assert!(q.len() <= q.capacity());
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
        assert!(q.len() <= 64);
    }
}
