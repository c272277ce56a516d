use std::time::{Duration, Instant};

use crate::config::BusConfig;

/// Wall-clock frame scheduler for the play loop.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    max_frames_per_update: u32,
    next_frame_at: Option<Instant>,
}

impl FramePacer {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            interval: config.frame_interval(),
            max_frames_per_update: config.max_frames_per_update.max(1),
            next_frame_at: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Forgets the schedule; the next call to `frames_due` runs a frame at once.
    pub fn reset(&mut self) {
        self.next_frame_at = None;
    }

    /// Number of frames to run at `now`, at most `max_frames_per_update`.
    /// When still more than one interval behind afterwards the schedule
    /// restarts from `now` instead of trying to catch up.
    pub fn frames_due(&mut self, now: Instant) -> u32 {
        let mut next = self.next_frame_at.unwrap_or(now);
        let mut due = 0u32;
        while now >= next && due < self.max_frames_per_update {
            due += 1;
            next += self.interval;
        }

        if now > next + self.interval {
            next = now;
        }

        self.next_frame_at = Some(next);
        due
    }
}
