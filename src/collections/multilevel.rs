//! Multilevel queue

use super::fifo::Fifo;

/// Fixed array of FIFO queues indexed by level
///
/// Dequeue scans from the requested level toward the highest-numbered
/// level, so lower indexes win when the scan starts at zero. This is the
/// scheduler's ready queue shape: level 0 holds short-quantum threads,
/// level 1 long-quantum threads.
pub struct MultilevelQueue<T> {
    levels: Vec<Fifo<T>>,
    size: usize,
}

impl<T> MultilevelQueue<T> {
    /// Create a queue with `num_levels` empty levels
    pub fn new(num_levels: usize) -> Self {
        let mut levels = Vec::with_capacity(num_levels);
        levels.resize_with(num_levels, Fifo::new);
        MultilevelQueue { levels, size: 0 }
    }

    /// Total items across all levels
    pub fn len(&self) -> usize {
        self.size
    }

    /// True when every level is empty
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Items queued at one level
    pub fn level_len(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    /// Append an item to the tail of a level
    pub fn enqueue(&mut self, level: usize, item: T) {
        self.levels[level].append(item);
        self.size += 1;
    }

    /// Pop the first item found scanning from `start_level` upward
    pub fn dequeue(&mut self, start_level: usize) -> Option<(usize, T)> {
        for level in start_level..self.levels.len() {
            if let Some(item) = self.levels[level].pop_front() {
                self.size -= 1;
                return Some((level, item));
            }
        }
        None
    }

    /// Borrow the first item found scanning from `start_level` upward
    pub fn peek(&self, start_level: usize) -> Option<(usize, &T)> {
        for level in start_level..self.levels.len() {
            if let Some(item) = self.levels[level].front() {
                return Some((level, item));
            }
        }
        None
    }
}
