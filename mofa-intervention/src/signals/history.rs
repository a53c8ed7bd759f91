//! Bounded rolling window of emotion samples

use crate::data::EmotionSample;
use std::collections::VecDeque;
use tracing::debug;

/// FIFO window of the most recent valid samples
#[derive(Debug, Clone)]
pub struct SignalHistory {
    samples: VecDeque<EmotionSample>,
    capacity: usize,
}

impl SignalHistory {
    /// Create an empty history holding at most `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest beyond capacity.
    ///
    /// Samples with confidence outside [0, 1] are discarded and `false` is returned.
    pub fn append(&mut self, sample: EmotionSample) -> bool {
        if let Err(e) = sample.validate() {
            debug!("Discarding emotion sample at {}: {}", sample.timestamp, e);
            return false;
        }
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    /// Ordered copy, oldest first
    pub fn snapshot(&self) -> Vec<EmotionSample> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<EmotionSample> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
