use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Bounded FIFO; pushing into a full buffer evicts the oldest item. Storage
/// grows with use rather than being reserved up front.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Shrinking drops the oldest items.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkHistoryPoint {
    pub timestamp: i64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsHistory {
    pub cpu: RingBuffer<f64>,
    pub memory: RingBuffer<f64>,
    pub network: RingBuffer<NetworkHistoryPoint>,
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            cpu: RingBuffer::new(capacity),
            memory: RingBuffer::new(capacity),
            network: RingBuffer::new(capacity),
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.cpu.set_capacity(capacity);
        self.memory.set_capacity(capacity);
        self.network.set_capacity(capacity);
    }

    pub fn clear(&mut self) {
        self.cpu.clear();
        self.memory.clear();
        self.network.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_is_evicted_first() {
        let mut buffer = RingBuffer::new(3);
        for i in 1..=5 {
            buffer.push(i);
            assert!(buffer.len() <= buffer.capacity());
        }
        assert_eq!(buffer.to_vec(), vec![3, 4, 5]);
    }

    #[test]
    fn shrinking_keeps_newest() {
        let mut buffer = RingBuffer::new(5);
        (1..=5).for_each(|i| buffer.push(i));
        buffer.set_capacity(2);
        assert_eq!(buffer.to_vec(), vec![4, 5]);
        buffer.push(6);
        assert_eq!(buffer.to_vec(), vec![5, 6]);
    }

    #[test]
    fn large_capacity_reserves_nothing() {
        let mut buffer = RingBuffer::new(usize::MAX);
        buffer.push(1u64);
        assert_eq!(buffer.capacity(), usize::MAX);
        assert_eq!(buffer.to_vec(), vec![1]);
    }

    #[test]
    fn zero_capacity_still_holds_latest() {
        let mut buffer = RingBuffer::new(0);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.to_vec(), vec!["b"]);
    }
}
