//! Round-trip latency measurement.
//!
//! Only the most recent in-flight frame is tracked, which matches the
//! single-flight transport: `mark_sent` overwrites any unconsumed timestamp
//! and `mark_received` consumes it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of samples in the rolling average.
pub const WINDOW: usize = 10;

#[derive(Debug)]
pub struct LatencyTracker {
    sent_at: Option<Instant>,
    window: VecDeque<u64>,
    capacity: usize,
    last_ms: u64,
    average_ms: u64,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::with_window(WINDOW)
    }

    pub fn with_window(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sent_at: None,
            window: VecDeque::with_capacity(capacity),
            capacity,
            last_ms: 0,
            average_ms: 0,
        }
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.sent_at = Some(now);
    }

    /// Complete the pending measurement. No-op (returns `None`) without a prior send.
    pub fn mark_received(&mut self, now: Instant) -> Option<u64> {
        let sent_at = self.sent_at.take()?;
        let sample = round_ms(now.saturating_duration_since(sent_at));

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);

        let sum: u64 = self.window.iter().sum();
        self.average_ms = (sum as f64 / self.window.len() as f64).round() as u64;
        self.last_ms = sample;
        Some(sample)
    }

    pub fn is_pending(&self) -> bool {
        self.sent_at.is_some()
    }

    /// Most recent round trip in milliseconds (0 before the first).
    pub fn last_ms(&self) -> u64 {
        self.last_ms
    }

    /// Rounded mean of the window in milliseconds (0 before the first).
    pub fn average_ms(&self) -> u64 {
        self.average_ms
    }

    pub fn samples(&self) -> impl Iterator<Item = u64> + '_ {
        self.window.iter().copied()
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn round_ms(duration: Duration) -> u64 {
    (duration.as_secs_f64() * 1000.0).round() as u64
}
