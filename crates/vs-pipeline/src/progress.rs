//! Progress throttling.
//!
//! Workers observe progress far more often than is worth recording. A
//! [`ProgressThrottle`] lets a value through at most once per interval and
//! only when it has grown.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_value: f32,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_value: 0.0,
        }
    }

    pub fn offer(&mut self, value: f32) -> Option<f32> {
        self.offer_at(value, Instant::now())
    }

    /// Returns `value` if it should be recorded now.
    pub fn offer_at(&mut self, value: f32, now: Instant) -> Option<f32> {
        if value <= self.last_value {
            return None;
        }
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_emit = Some(now);
        self.last_value = value;
        Some(value)
    }

    /// Emit the final value regardless of the interval.
    pub fn finish(&mut self, value: f32) -> Option<f32> {
        if value <= self.last_value {
            return None;
        }
        self.last_emit = Some(Instant::now());
        self.last_value = value;
        Some(value)
    }
}
