//! Activity Detector
//!
//! Classifies the recent rate of file-change events into an intensity used
//! to modulate debounce intervals, and raises `suspend_processing` while
//! the rate is above the suspension threshold (bulk operations, branch
//! switches). Processing resumes on its own once the rate falls.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Classified change-rate intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityIntensity {
    Low,
    Medium,
    High,
}

/// Rate thresholds in events per second over the sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    pub window_ms: u64,
    pub medium_rate: f32,
    pub high_rate: f32,
    /// Above this rate, processing suspends entirely
    pub suspend_rate: f32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            window_ms: 10_000,
            medium_rate: 0.5,
            high_rate: 2.0,
            suspend_rate: 10.0,
        }
    }
}

/// Sliding-window change-rate tracker.
#[derive(Debug)]
pub struct ActivityDetector {
    config: ActivityConfig,
    events: VecDeque<u64>,
    suspended: bool,
}

impl ActivityDetector {
    pub fn new(config: ActivityConfig) -> Self {
        Self {
            config,
            events: VecDeque::new(),
            suspended: false,
        }
    }

    /// Record one change event at `now_ms`.
    pub fn record(&mut self, now_ms: u64) {
        self.events.push_back(now_ms);
        self.trim(now_ms);
        self.update_suspension(now_ms);
    }

    /// Events per second over the window.
    pub fn rate(&self, now_ms: u64) -> f32 {
        let cutoff = now_ms.saturating_sub(self.config.window_ms);
        let count = self.events.iter().filter(|t| **t >= cutoff).count();
        count as f32 * 1_000.0 / self.config.window_ms as f32
    }

    pub fn intensity(&self, now_ms: u64) -> ActivityIntensity {
        let rate = self.rate(now_ms);
        if rate >= self.config.high_rate {
            ActivityIntensity::High
        } else if rate >= self.config.medium_rate {
            ActivityIntensity::Medium
        } else {
            ActivityIntensity::Low
        }
    }

    /// Whether processing is currently suspended. Re-evaluated against the
    /// clock so suspension clears even without new events.
    pub fn suspend_processing(&mut self, now_ms: u64) -> bool {
        self.trim(now_ms);
        self.update_suspension(now_ms);
        self.suspended
    }

    fn update_suspension(&mut self, now_ms: u64) {
        let rate = self.rate(now_ms);
        if !self.suspended && rate >= self.config.suspend_rate {
            info!("High activity ({:.1} events/s), suspending processing", rate);
            self.suspended = true;
        } else if self.suspended && rate < self.config.suspend_rate {
            debug!("Activity back to {:.1} events/s, resuming", rate);
            self.suspended = false;
        }
    }

    fn trim(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.config.window_ms);
        while matches!(self.events.front(), Some(t) if *t < cutoff) {
            self.events.pop_front();
        }
    }
}
