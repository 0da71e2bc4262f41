//! Variable difficulty control
//!
//! Each session keeps a small ring of inter-share intervals; the retarget
//! sweep turns the observed cadence into a difficulty adjustment aimed at
//! the configured target time. The numeric step is pure so it can be tested
//! without sessions or clocks.

use crate::config::VarDiffConfig;

/// Samples kept per session.
pub const RING_CAPACITY: usize = 16;

/// Fixed-capacity ring of inter-share intervals in seconds.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<u64>,
    capacity: usize,
    cursor: usize,
    full: bool,
}

impl RingBuffer {
    /// Create an empty ring with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
            full: false,
        }
    }

    /// Append a sample, overwriting the oldest once full.
    pub fn append(&mut self, value: u64) {
        if self.full {
            self.data[self.cursor] = value;
            self.cursor = (self.cursor + 1) % self.capacity;
        } else {
            self.data.push(value);
            if self.data.len() == self.capacity {
                self.full = true;
            }
        }
    }

    /// Average of the stored samples, optionally with one extra sample mixed
    /// in. `None` when there is nothing to average.
    pub fn avg(&self, extra: Option<u64>) -> Option<f64> {
        let mut sum: u64 = self.data.iter().sum();
        let mut count = self.data.len();
        if let Some(value) = extra {
            sum += value;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        Some(sum as f64 / count as f64)
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
        self.full = false;
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no samples are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Derived retarget bounds.
#[derive(Debug, Clone, Copy)]
pub struct VarDiffBounds {
    /// Fastest acceptable average interval
    pub t_min: f64,
    /// Slowest acceptable average interval
    pub t_max: f64,
}

impl VarDiffBounds {
    /// Compute the tolerance window around the target time.
    pub fn from_config(cfg: &VarDiffConfig) -> Self {
        let variance = cfg.variance_percent as f64 / 100.0 * cfg.target_time as f64;
        Self {
            t_min: cfg.target_time as f64 - variance,
            t_max: cfg.target_time as f64 + variance,
        }
    }
}

/// Compute a new difficulty from the average share interval.
///
/// Returns `None` when the average sits inside the tolerance window or the
/// difficulty is already pinned at the applicable bound. The proportional
/// step is clamped to `max_jump` percent of the current difficulty and the
/// result rounded to an integer.
pub fn retarget(cfg: &VarDiffConfig, bounds: &VarDiffBounds, current: u64, avg: f64) -> Option<u64> {
    let current_f = current as f64;

    let (mut new_diff, direction) = if avg > bounds.t_max && current > cfg.min_diff {
        let proposed = (cfg.target_time as f64 / avg * current_f).max(cfg.min_diff as f64);
        (proposed, -1.0)
    } else if avg < bounds.t_min && current < cfg.max_diff {
        let proposed = (cfg.target_time as f64 / avg * current_f).min(cfg.max_diff as f64);
        (proposed, 1.0)
    } else {
        return None;
    };

    if (new_diff - current_f).abs() / current_f * 100.0 > cfg.max_jump as f64 {
        new_diff = current_f + direction * cfg.max_jump as f64 / 100.0 * current_f;
    }

    let rounded = new_diff.round() as u64;
    if rounded == current {
        return None;
    }
    Some(rounded)
}
