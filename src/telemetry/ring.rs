//! # Bounded Ring
//!
//! Fixed-capacity FIFO buffer; the oldest entry is evicted on overflow.

use std::collections::VecDeque;

/// Fixed-capacity FIFO buffer
#[derive(Debug, Clone)]
pub struct Ring<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Ring<T> {
    /// Create an empty ring holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, returning the evicted oldest item if the ring was full
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
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
}

impl<T: Clone> Ring<T> {
    /// The newest `count` items, oldest first
    pub fn recent(&self, count: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(count);
        self.items.iter().skip(skip).cloned().collect()
    }
}
