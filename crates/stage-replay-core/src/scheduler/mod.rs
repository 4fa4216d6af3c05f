//! Progressive release scheduler.
//!
//! [`ReleaseScheduler`] owns the mutable release progress for one loaded
//! dataset: the fixed competitor order, the current-stage cursor and the run
//! state. It is purely synchronous; the controller decides when to call
//! [`ReleaseScheduler::tick`] and what to do with the records it returns.

mod batch;
mod progress;
mod state;
mod status;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

pub use batch::{
    main_stage_share, BatchOutcome, StageProgress, StageRelease, MAIN_STAGE_SHARE_PERCENT,
    MAX_CONCURRENT_STAGES,
};
pub use progress::ReleaseProgress;
pub use state::RunState;
pub use status::SchedulerStatus;

use crate::config::{BatchSizing, ReplayConfig};
use crate::dataset::DatasetIndex;
use crate::error::{ReplayError, ReplayResult};
use crate::ordering::perturbed_order;

/// What a start request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Ready -> Running
    Started,
    /// Paused -> Running
    Resumed,
    /// Already running; nothing changed
    AlreadyRunning,
}

/// Release scheduler for one dataset.
pub struct ReleaseScheduler {
    index: Arc<DatasetIndex>,
    config: ReplayConfig,
    progress: ReleaseProgress,
    state: RunState,
    rng: StdRng,
    started_at: Option<DateTime<Utc>>,
}

impl ReleaseScheduler {
    /// Create a scheduler in `Ready` with zeroed progress and a fresh order.
    pub fn new(index: Arc<DatasetIndex>, config: ReplayConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let order = competitor_order(&index, config.order_variation, &mut rng);
        let progress = ReleaseProgress::new(&index, order);
        Self {
            index,
            config,
            progress,
            state: RunState::Ready,
            rng,
            started_at: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn index(&self) -> &Arc<DatasetIndex> {
        &self.index
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn progress(&self) -> &ReleaseProgress {
        &self.progress
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Ready/Paused -> Running. Idempotent while running.
    pub fn start(&mut self) -> ReplayResult<StartOutcome> {
        match self.state {
            RunState::Running => Ok(StartOutcome::AlreadyRunning),
            RunState::Paused => {
                self.state = RunState::Running;
                Ok(StartOutcome::Resumed)
            }
            RunState::Ready => {
                self.state = RunState::Running;
                self.started_at.get_or_insert_with(Utc::now);
                Ok(StartOutcome::Started)
            }
            state => Err(ReplayError::invalid("start", state)),
        }
    }

    /// Toggle Running <-> Paused. Returns whether the run is now paused.
    pub fn toggle_pause(&mut self) -> ReplayResult<bool> {
        match self.state {
            RunState::Running => {
                self.state = RunState::Paused;
                Ok(true)
            }
            RunState::Paused => {
                self.state = RunState::Running;
                Ok(false)
            }
            state => Err(ReplayError::invalid("pause", state)),
        }
    }

    /// Running/Paused -> Ready, keeping progress.
    pub fn stop(&mut self) -> ReplayResult<()> {
        if !self.state.is_armed() {
            return Err(ReplayError::invalid("stop", self.state));
        }
        self.state = RunState::Ready;
        Ok(())
    }

    /// Zero progress, re-derive the competitor order and return to `Ready`.
    pub fn reset(&mut self) {
        let order = competitor_order(&self.index, self.config.order_variation, &mut self.rng);
        self.progress = ReleaseProgress::new(&self.index, order);
        self.state = RunState::Ready;
        self.started_at = None;
    }

    /// Produce the batch for one timer tick.
    ///
    /// Only a running scheduler releases; any other state yields an empty
    /// batch.
    pub fn tick(&mut self) -> BatchOutcome {
        match self.state {
            RunState::Running => self.produce(),
            _ => self.idle_outcome(),
        }
    }

    /// Produce one batch on demand while no timer drives the run.
    ///
    /// Releases only in `Ready`; running or paused runs belong to the timer.
    pub fn drain(&mut self) -> BatchOutcome {
        match self.state {
            RunState::Ready => self.produce(),
            _ => self.idle_outcome(),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let total_records = self.index.total_records();
        let total_released = self.progress.total_released();

        let active_stages = (0..self.index.stage_count())
            .filter(|&s| {
                let released = self.progress.released(s);
                released > 0 && released < self.index.total_for(s)
            })
            .filter_map(|s| StageProgress::of(&self.index, &self.progress, s))
            .collect();

        let current_stage = self
            .progress
            .peek_active_stage(&self.index)
            .and_then(|s| self.index.stage(s))
            .map(|s| s.id);

        let estimated_seconds_remaining = match self.state {
            RunState::Completed => 0,
            _ => status::estimate_seconds_remaining(
                total_records - total_released,
                self.config.batch.mean(),
                self.config.interval.as_secs_f64(),
            ),
        };

        SchedulerStatus {
            state: self.state,
            total_released,
            total_records,
            percent: self.percent(),
            active_stages,
            current_stage,
            estimated_seconds_remaining,
            interval_ms: self.config.interval.as_millis() as u64,
            started_at: self.started_at,
            competitor_count: self.index.competitor_count(),
            stage_count: self.index.stage_count(),
        }
    }

    fn percent(&self) -> f64 {
        match self.index.total_records() {
            0 => 100.0,
            total => self.progress.total_released() as f64 / total as f64 * 100.0,
        }
    }

    fn draw_batch_size(&mut self) -> usize {
        match self.config.batch {
            BatchSizing::Range { min, max } => self.rng.gen_range(min..=max),
            BatchSizing::Fixed { size } => size,
        }
    }

    fn produce(&mut self) -> BatchOutcome {
        if self.progress.total_released() >= self.index.total_records() {
            self.state = RunState::Completed;
            let mut outcome = self.idle_outcome();
            outcome.just_completed = true;
            return outcome;
        }

        let batch_size = self.draw_batch_size();
        let (records, live_stages, released_by_stage) = batch::release_batch(
            &self.index,
            &mut self.progress,
            batch_size,
            self.config.overlap_threshold,
        );

        debug!(
            batch_size,
            released = records.len(),
            total_released = self.progress.total_released(),
            current_stage = self.progress.current_stage(),
            "batch produced"
        );

        BatchOutcome {
            records,
            completed: false,
            just_completed: false,
            total_released: self.progress.total_released(),
            total_records: self.index.total_records(),
            percent: self.percent(),
            live_stages,
            released_by_stage,
        }
    }

    fn idle_outcome(&self) -> BatchOutcome {
        BatchOutcome {
            completed: self.state == RunState::Completed,
            total_released: self.progress.total_released(),
            total_records: self.index.total_records(),
            percent: self.percent(),
            ..Default::default()
        }
    }
}

fn competitor_order(index: &DatasetIndex, variation: f64, rng: &mut StdRng) -> Vec<usize> {
    let natural: Vec<usize> = (0..index.competitor_count()).collect();
    perturbed_order(&natural, variation, rng)
}
