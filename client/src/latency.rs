//! Round-trip latency statistics from ping/pong exchanges

use std::collections::VecDeque;
use std::time::Instant;

/// One measured round trip
#[derive(Debug, Clone)]
pub struct LatencySample {
    pub rtt_ms: f32,
    pub timestamp: Instant,
}

/// Rolling window of round-trip samples
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    history: VecDeque<LatencySample>,
    max_samples: usize,
}

impl LatencyTracker {
    pub const DEFAULT_SAMPLES: usize = 100;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_SAMPLES)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Records the round trip for a pong carrying `sent_ms`, given the current time `now_ms`.
    /// Echoes from the future (clock steps) count as zero.
    pub fn record_pong(&mut self, sent_ms: u64, now_ms: u64) {
        self.record(now_ms.saturating_sub(sent_ms) as f32);
    }

    pub fn record(&mut self, rtt_ms: f32) {
        self.history.push_back(LatencySample {
            rtt_ms,
            timestamp: Instant::now(),
        });

        // Maintain max samples
        while self.history.len() > self.max_samples {
            self.history.pop_front();
        }
    }

    pub fn last(&self) -> Option<f32> {
        self.history.back().map(|s| s.rtt_ms)
    }

    pub fn average(&self) -> Option<f32> {
        if self.history.is_empty() {
            return None;
        }
        let sum: f32 = self.history.iter().map(|s| s.rtt_ms).sum();
        Some(sum / self.history.len() as f32)
    }

    /// Mean absolute difference between consecutive samples
    pub fn jitter(&self) -> Option<f32> {
        if self.history.len() < 2 {
            return None;
        }
        let total: f32 = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .map(|(a, b)| (b.rtt_ms - a.rtt_ms).abs())
            .sum();
        Some(total / (self.history.len() - 1) as f32)
    }

    /// Time of the most recent pong
    pub fn last_update(&self) -> Option<Instant> {
        self.history.back().map(|s| s.timestamp)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_empty_tracker() {
        let tracker = LatencyTracker::new();
        assert!(tracker.is_empty());
        assert_eq!(tracker.last(), None);
        assert_eq!(tracker.average(), None);
        assert_eq!(tracker.jitter(), None);
    }

    #[test]
    fn test_record_pong() {
        let mut tracker = LatencyTracker::new();
        tracker.record_pong(1_000, 1_042);
        assert_eq!(tracker.last(), Some(42.0));

        tracker.record_pong(2_000, 1_990);
        assert_eq!(tracker.last(), Some(0.0));
        assert!(tracker.last_update().is_some());
    }

    #[test]
    fn test_average_and_jitter() {
        let mut tracker = LatencyTracker::new();
        for rtt in [10.0, 20.0, 10.0, 40.0] {
            tracker.record(rtt);
        }
        assert_approx_eq!(tracker.average().unwrap(), 20.0);
        assert_approx_eq!(tracker.jitter().unwrap(), (10.0 + 10.0 + 30.0) / 3.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut tracker = LatencyTracker::with_capacity(3);
        for rtt in [100.0, 1.0, 2.0, 3.0] {
            tracker.record(rtt);
        }
        assert_eq!(tracker.len(), 3);
        assert_approx_eq!(tracker.average().unwrap(), 2.0);
    }
}
