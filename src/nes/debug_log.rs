use std::collections::VecDeque;

pub const DEFAULT_LOG_CAPACITY: usize = 512;

/// Bounded history of notable bus events, oldest dropped first.
#[derive(Debug, Clone)]
pub struct DebugLog {
    events: VecDeque<String>,
    capacity: usize,
}

impl Default for DebugLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl DebugLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, event: impl Into<String>) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event.into());
    }

    /// Up to `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
