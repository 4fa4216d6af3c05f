//! Replay parameters.
//!
//! [`ReplayParams`] is the loose, all-optional shape a caller submits (CLI
//! flags, a JSON body). [`ReplayParams::resolve`] clamps it into a validated
//! [`ReplayConfig`] the scheduler can trust.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ordering::MAX_ORDER_VARIATION;

pub const DEFAULT_BATCH_MIN: usize = 30;
pub const DEFAULT_BATCH_MAX: usize = 50;
pub const BATCH_LIMITS: (usize, usize) = (3, 50);

pub const DEFAULT_INTERVAL_SECS: u64 = 5;
pub const INTERVAL_LIMITS_SECS: (u64, u64) = (1, 90);

pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.7;
pub const DEFAULT_ORDER_VARIATION: f64 = 20.0;

/// How many records a tick tries to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BatchSizing {
    /// Uniform draw from `min..=max` every tick
    Range { min: usize, max: usize },
    /// Same size every tick
    Fixed { size: usize },
}

impl BatchSizing {
    /// Mean batch size, used for pacing estimates.
    pub fn mean(&self) -> f64 {
        match *self {
            BatchSizing::Range { min, max } => (min + max) as f64 / 2.0,
            BatchSizing::Fixed { size } => size as f64,
        }
    }
}

/// Caller-supplied replay options. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayParams {
    #[serde(default)]
    pub batch_min: Option<usize>,
    #[serde(default)]
    pub batch_max: Option<usize>,
    /// Fixed batch size; takes precedence over `batch_min`/`batch_max`
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    /// Target replay length; derives the tick interval when `interval_secs`
    /// is not given
    #[serde(default)]
    pub duration_minutes: Option<f64>,
    #[serde(default)]
    pub overlap_threshold: Option<f64>,
    #[serde(default)]
    pub order_variation: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Validated replay configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayConfig {
    pub batch: BatchSizing,
    pub interval: Duration,
    pub overlap_threshold: f64,
    pub order_variation: f64,
    pub seed: Option<u64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayParams::default().resolve(0)
    }
}

impl ReplayParams {
    /// Clamp every option into its sane range.
    ///
    /// `total_records` is only needed to derive the interval from
    /// `duration_minutes`.
    pub fn resolve(&self, total_records: usize) -> ReplayConfig {
        let batch = match self.batch_size {
            Some(size) => BatchSizing::Fixed {
                size: clamp_batch(size),
            },
            None => {
                let min = clamp_batch(self.batch_min.unwrap_or(DEFAULT_BATCH_MIN));
                let max = clamp_batch(self.batch_max.unwrap_or(DEFAULT_BATCH_MAX));
                BatchSizing::Range {
                    min: min.min(max),
                    max: min.max(max),
                }
            }
        };

        let interval_secs = match (self.interval_secs, self.duration_minutes) {
            (Some(secs), _) => secs as f64,
            (None, Some(minutes)) if minutes.is_finite() && minutes > 0.0 => {
                let ticks = (total_records as f64 / batch.mean()).ceil().max(1.0);
                minutes * 60.0 / ticks
            }
            _ => DEFAULT_INTERVAL_SECS as f64,
        };
        let (lo, hi) = INTERVAL_LIMITS_SECS;
        let interval = Duration::from_secs_f64(interval_secs.clamp(lo as f64, hi as f64));

        let overlap_threshold = self
            .overlap_threshold
            .filter(|t| t.is_finite())
            .map_or(DEFAULT_OVERLAP_THRESHOLD, |t| t.clamp(0.0, 1.0));

        let order_variation = self
            .order_variation
            .filter(|v| v.is_finite())
            .map_or(DEFAULT_ORDER_VARIATION, |v| v.abs().min(MAX_ORDER_VARIATION));

        ReplayConfig {
            batch,
            interval,
            overlap_threshold,
            order_variation,
            seed: self.seed,
        }
    }
}

fn clamp_batch(size: usize) -> usize {
    size.clamp(BATCH_LIMITS.0, BATCH_LIMITS.1)
}
