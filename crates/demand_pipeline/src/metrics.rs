//! Engine-agnostic execution metrics for pipeline stages.
//!
//! Feature-gated and runtime-toggled so disabled builds pay nothing.
//!
//! # Usage
//!
//! ```ignore
//! use demand_pipeline::metrics::{ExecutionMetrics, COLLECT_METRICS};
//!
//! // Compile with --features metrics
//! // Runtime toggle:
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! // Inspect after an update:
//! let m = pipeline.metrics(stage)?;
//! println!("{} runs, avg {:.1} us", m.executions, m.avg_data_timing_us());
//! ```

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;

/// Runtime toggle for metrics collection.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// Check if metrics collection is enabled (both compile-time and runtime).
#[inline]
pub fn is_enabled() -> bool {
    #[cfg(feature = "metrics")]
    {
        COLLECT_METRICS.load(Ordering::Relaxed)
    }
    #[cfg(not(feature = "metrics"))]
    {
        false
    }
}

/// Bounded history of recent samples.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a value, evicting the oldest at capacity.
    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.buffer.back()
    }
}

impl RollingWindow<u64> {
    pub fn sum(&self) -> u64 {
        self.buffer.iter().sum()
    }

    pub fn average(&self) -> f64 {
        if self.buffer.is_empty() {
            0.0
        } else {
            self.sum() as f64 / self.buffer.len() as f64
        }
    }

    pub fn min_max(&self) -> Option<(u64, u64)> {
        let min = *self.buffer.iter().min()?;
        let max = *self.buffer.iter().max()?;
        Some((min, max))
    }
}

impl Default for RollingWindow<u64> {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Per-stage statistics updated by the executive.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Data-phase executions, including each streamed chunk.
    pub executions: u64,
    /// Executions that reported more chunks remaining.
    pub continuations: u64,
    /// Data phases skipped because the output was already up to date.
    pub skipped: u64,
    /// Data-phase failures (validation or algorithm).
    pub failures: u64,
    /// Rolling window of data-phase times in microseconds.
    pub data_timings: RollingWindow<u64>,
    pub last_data_us: u64,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&mut self, timing_us: u64, more_remaining: bool) {
        if !is_enabled() {
            return;
        }
        self.executions += 1;
        if more_remaining {
            self.continuations += 1;
        }
        self.data_timings.push(timing_us);
        self.last_data_us = timing_us;
    }

    pub fn record_skip(&mut self) {
        if is_enabled() {
            self.skipped += 1;
        }
    }

    pub fn record_failure(&mut self) {
        if is_enabled() {
            self.failures += 1;
        }
    }

    pub fn avg_data_timing_us(&self) -> f64 {
        self.data_timings.average()
    }

    /// Reset everything except the cumulative execution count.
    pub fn reset(&mut self) {
        self.continuations = 0;
        self.skipped = 0;
        self.failures = 0;
        self.data_timings.clear();
        self.last_data_us = 0;
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_window() {
        let mut window = RollingWindow::new(3);
        window.push(10u64);
        window.push(20);
        window.push(30);
        assert_eq!(window.average(), 20.0);

        // Oldest is evicted
        window.push(40);
        assert_eq!(window.len(), 3);
        assert_eq!(window.sum(), 90);
        assert_eq!(window.min_max(), Some((20, 40)));
    }

    #[test]
    fn test_execution_counters() {
        let mut metrics = ExecutionMetrics::new();
        metrics.record_execution(100, true);
        metrics.record_execution(300, false);
        metrics.record_skip();

        assert_eq!(metrics.executions, 2);
        assert_eq!(metrics.continuations, 1);
        assert_eq!(metrics.skipped, 1);
        assert_eq!(metrics.avg_data_timing_us(), 200.0);
        assert_eq!(metrics.last_data_us, 300);

        metrics.reset();
        assert_eq!(metrics.executions, 2);
        assert!(metrics.data_timings.is_empty());
    }
}
