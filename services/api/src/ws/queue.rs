//! Pre-readiness buffer for client frames.

use std::collections::VecDeque;

/// A bounded FIFO of raw client payloads received before the upstream
/// session is ready.
///
/// When full, the oldest entry is evicted and handed back so the caller can
/// log it; arrival order of the survivors is preserved. The queue is drained
/// exactly once; live frames bypass it entirely after that.
#[derive(Debug)]
pub struct PendingQueue {
    buf: VecDeque<String>,
    capacity: usize,
}

impl PendingQueue {
    /// `capacity` must be at least 1; config validation enforces this.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self {
            buf: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Appends a payload, returning the evicted oldest entry when full.
    pub fn push(&mut self, payload: String) -> Option<String> {
        let evicted = if self.buf.len() == self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(payload);
        evicted
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the queue front-to-back.
    pub fn drain(self) -> impl Iterator<Item = String> {
        self.buf.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_arrival_order() {
        let mut queue = PendingQueue::new(8);
        assert!(queue.is_empty());
        assert!(queue.push("a".to_string()).is_none());
        assert!(queue.push("b".to_string()).is_none());
        assert!(queue.push("c".to_string()).is_none());
        assert_eq!(queue.len(), 3);

        let drained: Vec<String> = queue.drain().collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
    }

    #[test]
    fn overflow_evicts_the_oldest_entry() {
        let mut queue = PendingQueue::new(2);
        assert!(queue.push("a".to_string()).is_none());
        assert!(queue.push("b".to_string()).is_none());
        assert_eq!(queue.push("c".to_string()).as_deref(), Some("a"));

        let drained: Vec<String> = queue.drain().collect();
        assert_eq!(drained, vec!["b", "c"]);
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn zero_capacity_is_a_bug() {
        PendingQueue::new(0);
    }
}
