//! Adaptive Batch Sizing
//!
//! Tunes the embedding batch size from observed throughput and heap
//! pressure. Adjustments run at most once per interval, carry hysteresis
//! (reversing direction needs a larger throughput change than continuing),
//! remember per-size throughput so a size known to be worse is not retried,
//! and converge either on sustained stability, on two successive downward
//! confirmations, or when the recent adjustment trail oscillates.
//!
//! Failure recovery is tracked here too: two consecutive batch failures
//! shrink dispatch to a small recovery size that halves (with a floor) on
//! repeated failure and restores the previous size on success.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Sizer tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub initial: usize,
    pub min: usize,
    pub max: usize,
    pub step: usize,
    /// Minimum gap between adjustments
    pub adjust_interval_ms: u64,
    /// Heap ceiling; crossing `heap_pressure` of it forces a decrease
    pub heap_limit_bytes: u64,
    pub heap_pressure: f64,
    /// Sub-batch size used while recovering from worker failures
    pub failure_recovery_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            initial: 400,
            min: 200,
            max: 800,
            step: 100,
            adjust_interval_ms: 5_000,
            heap_limit_bytes: 4 * 1024 * 1024 * 1024,
            heap_pressure: 0.85,
            failure_recovery_size: 50,
        }
    }
}

/// One observed batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchSample {
    pub size: usize,
    pub duration_ms: u64,
    pub heap_used_after: u64,
    pub success: bool,
}

impl BatchSample {
    /// Chunks per second.
    pub fn throughput(&self) -> f64 {
        if self.duration_ms == 0 {
            self.size as f64 * 1_000.0
        } else {
            self.size as f64 * 1_000.0 / self.duration_ms as f64
        }
    }
}

/// Adjustment direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Up,
    Down,
    #[default]
    None,
}

/// Hysteresis thresholds: continuing in the same direction needs a 5%
/// change, reversing needs 10%.
const SAME_DIRECTION_THRESHOLD: f64 = 0.05;
const REVERSAL_THRESHOLD: f64 = 0.10;

/// Samples kept for throughput estimation.
const HISTORY_LIMIT: usize = 20;
/// Adjustment trail kept for oscillation detection.
const CONVERGENCE_HISTORY_LIMIT: usize = 10;
/// Window inspected for oscillation.
const OSCILLATION_WINDOW: usize = 6;
/// Local extrema within the window that mean oscillation.
const OSCILLATION_EXTREMA: usize = 3;
/// Stable adjustments before converging.
const STABLE_LIMIT: u32 = 5;
/// Downward confirmations before converging.
const DOWN_CONFIRMATIONS: u32 = 2;
/// Recovery size floor when halving.
const RECOVERY_FLOOR: usize = 10;
/// Recent successful samples required before throughput steering.
const MIN_SAMPLES: usize = 3;

/// Adaptive batch sizer.
#[derive(Debug)]
pub struct AdaptiveBatchSizer {
    config: BatchConfig,
    current: usize,
    optimal: Option<usize>,
    direction: Direction,
    stable_count: u32,
    down_confirmations: u32,
    history: VecDeque<BatchSample>,
    convergence_history: VecDeque<usize>,
    consecutive_failures: u32,
    failure_recovery_size: usize,
    size_before_failure: Option<usize>,
    /// Weighted throughput observed per size; sizes known worse are not
    /// retried
    size_throughput: HashMap<usize, f64>,
    last_avg: Option<f64>,
    last_adjustment_ms: Option<u64>,
    converged: bool,
}

impl AdaptiveBatchSizer {
    pub fn new(config: BatchConfig) -> Self {
        let current = config.initial.clamp(config.min, config.max);
        let failure_recovery_size = config.failure_recovery_size;
        Self {
            config,
            current,
            optimal: None,
            direction: Direction::None,
            stable_count: 0,
            down_confirmations: 0,
            history: VecDeque::new(),
            convergence_history: VecDeque::new(),
            consecutive_failures: 0,
            failure_recovery_size,
            size_before_failure: None,
            size_throughput: HashMap::new(),
            last_avg: None,
            last_adjustment_ms: None,
            converged: false,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn optimal(&self) -> Option<usize> {
        self.optimal
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn convergence_history(&self) -> &VecDeque<usize> {
        &self.convergence_history
    }

    /// Number of adjustments made so far.
    pub fn adjustment_count(&self) -> usize {
        self.convergence_history.len().min(CONVERGENCE_HISTORY_LIMIT)
    }

    // ------------------------------------------------------------------
    // Sampling and adjustment
    // ------------------------------------------------------------------

    /// Record an observed batch and possibly adjust. `now_ms` is wall time;
    /// callers pass real time, tests pass synthetic time.
    pub fn record_sample(&mut self, sample: BatchSample, now_ms: u64) {
        self.history.push_back(sample);
        if self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        if sample.success {
            self.consecutive_failures = 0;
        }
        if !self.converged {
            self.adjust(now_ms);
        }
    }

    fn adjust(&mut self, now_ms: u64) {
        if let Some(last) = self.last_adjustment_ms {
            if now_ms.saturating_sub(last) < self.config.adjust_interval_ms {
                return;
            }
        }

        // Heap pressure overrides throughput steering.
        let heap_line = (self.config.heap_limit_bytes as f64 * self.config.heap_pressure) as u64;
        if let Some(heap_used_after) = self.history.back().map(|latest| latest.heap_used_after) {
            if heap_used_after > heap_line {
                let cut = self.config.step.max(self.current / 5);
                self.set_current(self.current.saturating_sub(cut), now_ms);
                self.direction = Direction::Down;
                self.stable_count = 0;
                debug!(
                    "Heap pressure ({} bytes), batch size down to {}",
                    heap_used_after, self.current
                );
                return;
            }
        }

        let recent: Vec<&BatchSample> = self
            .history
            .iter()
            .rev()
            .filter(|s| s.success)
            .take(MIN_SAMPLES)
            .collect();
        if recent.len() < MIN_SAMPLES {
            return;
        }

        // Weighted average, most recent sample weighs most.
        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        for (i, sample) in recent.iter().enumerate() {
            let weight = (MIN_SAMPLES - i) as f64;
            weighted += sample.throughput() * weight;
            weight_sum += weight;
        }
        let avg = weighted / weight_sum;
        self.size_throughput.insert(self.current, avg);

        let Some(baseline) = self.last_avg else {
            // First reading becomes the baseline; explore upward.
            self.last_avg = Some(avg);
            self.move_to(self.current + self.config.step, Direction::Up, now_ms);
            return;
        };

        let ratio = if baseline == 0.0 {
            0.0
        } else {
            (avg - baseline) / baseline
        };
        self.last_avg = Some(avg);

        if ratio >= self.threshold_for(Direction::Up) {
            let target = (self.current + self.config.step).min(self.config.max);
            if self.known_worse(target, avg) {
                // That size was already measured slower; hold position.
                self.note_stable(now_ms);
            } else {
                self.down_confirmations = 0;
                self.move_to(target, Direction::Up, now_ms);
            }
        } else if ratio <= -self.threshold_for(Direction::Down) {
            let target = self.current.saturating_sub(self.config.step).max(self.config.min);
            self.down_confirmations += 1;
            if self.down_confirmations >= DOWN_CONFIRMATIONS {
                self.move_to(target, Direction::Down, now_ms);
                self.converge("two downward confirmations");
            } else {
                self.move_to(target, Direction::Down, now_ms);
            }
        } else {
            self.note_stable(now_ms);
        }

        self.detect_oscillation();
    }

    fn threshold_for(&self, proposed: Direction) -> f64 {
        if self.direction == Direction::None || self.direction == proposed {
            SAME_DIRECTION_THRESHOLD
        } else {
            REVERSAL_THRESHOLD
        }
    }

    fn known_worse(&self, target: usize, current_avg: f64) -> bool {
        self.size_throughput
            .get(&target)
            .map(|&t| t < current_avg)
            .unwrap_or(false)
    }

    fn note_stable(&mut self, now_ms: u64) {
        self.stable_count += 1;
        self.record_adjustment(now_ms);
        if self.stable_count >= STABLE_LIMIT {
            self.converge("stable");
        }
    }

    fn move_to(&mut self, target: usize, direction: Direction, now_ms: u64) {
        self.direction = direction;
        self.stable_count = 0;
        self.set_current(target, now_ms);
    }

    fn set_current(&mut self, target: usize, now_ms: u64) {
        self.current = target.clamp(self.config.min, self.config.max);
        self.record_adjustment(now_ms);
    }

    fn record_adjustment(&mut self, now_ms: u64) {
        self.last_adjustment_ms = Some(now_ms);
        self.convergence_history.push_back(self.current);
        if self.convergence_history.len() > CONVERGENCE_HISTORY_LIMIT {
            self.convergence_history.pop_front();
        }
    }

    fn converge(&mut self, reason: &str) {
        self.converged = true;
        self.optimal = Some(self.current);
        info!("Batch size converged at {} ({})", self.current, reason);
    }

    /// Count of local extrema in the recent adjustment trail.
    pub fn oscillation_count(&self) -> usize {
        let window: Vec<usize> = self
            .convergence_history
            .iter()
            .rev()
            .take(OSCILLATION_WINDOW)
            .rev()
            .copied()
            .collect();
        if window.len() < 3 {
            return 0;
        }
        window
            .windows(3)
            .filter(|w| (w[1] > w[0] && w[1] > w[2]) || (w[1] < w[0] && w[1] < w[2]))
            .count()
    }

    fn detect_oscillation(&mut self) {
        if !self.converged && self.oscillation_count() >= OSCILLATION_EXTREMA {
            self.converge("oscillation");
        }
    }

    // ------------------------------------------------------------------
    // Failure recovery
    // ------------------------------------------------------------------

    /// Record a failed batch (timeout or worker exit).
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    /// Two consecutive failures trigger the recovery path.
    pub fn needs_recovery(&self) -> bool {
        self.consecutive_failures >= 2
    }

    /// Current recovery sub-batch size.
    pub fn recovery_size(&self) -> usize {
        self.failure_recovery_size
    }

    /// Shrink dispatch to the recovery size, remembering where we were.
    pub fn enter_recovery(&mut self) {
        if self.size_before_failure.is_none() {
            self.size_before_failure = Some(self.current);
        }
        self.current = self.failure_recovery_size.clamp(1, self.config.max);
        debug!("Entering failure recovery at batch size {}", self.current);
    }

    /// A recovery pass succeeded: reset failures and grow back.
    pub fn recovery_succeeded(&mut self) {
        self.consecutive_failures = 0;
        if let Some(previous) = self.size_before_failure.take() {
            self.current = previous.clamp(self.config.min, self.config.max);
        }
        self.failure_recovery_size = self.config.failure_recovery_size;
    }

    /// A recovery pass failed too: halve the recovery size (with floor).
    pub fn recovery_failed(&mut self) {
        self.failure_recovery_size = (self.failure_recovery_size / 2).max(RECOVERY_FLOOR);
        self.current = self.failure_recovery_size;
    }
}
