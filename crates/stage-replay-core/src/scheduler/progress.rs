//! Mutable release progress for one run.

use crate::dataset::DatasetIndex;

/// Release counters, per-competitor stage cursor and the fixed serving order.
///
/// Invariants (checked in debug builds on every release):
/// - `released_per_stage[s] <= total_per_stage[s]`
/// - `total_released == sum(released_per_stage)`
/// - a competitor's record for stage `s` is released only when its last
///   released stage is `s - 1` (none for `s == 0`)
/// - `current_stage` never decreases
#[derive(Debug, Clone)]
pub struct ReleaseProgress {
    released_per_stage: Vec<usize>,
    total_released: usize,
    /// Indexed by competitor position in the dataset index
    last_released: Vec<Option<usize>>,
    current_stage: usize,
    /// Competitor positions in serving order
    competitor_order: Vec<usize>,
}

impl ReleaseProgress {
    pub fn new(index: &DatasetIndex, competitor_order: Vec<usize>) -> Self {
        debug_assert_eq!(competitor_order.len(), index.competitor_count());
        Self {
            released_per_stage: vec![0; index.stage_count()],
            total_released: 0,
            last_released: vec![None; index.competitor_count()],
            current_stage: 0,
            competitor_order,
        }
    }

    pub fn released(&self, stage: usize) -> usize {
        self.released_per_stage.get(stage).copied().unwrap_or(0)
    }

    pub fn released_per_stage(&self) -> &[usize] {
        &self.released_per_stage
    }

    pub fn total_released(&self) -> usize {
        self.total_released
    }

    /// Highest stage position released for a competitor (`None` == -1).
    pub fn last_released(&self, competitor: usize) -> Option<usize> {
        self.last_released.get(competitor).copied().flatten()
    }

    pub fn current_stage(&self) -> usize {
        self.current_stage
    }

    pub fn competitor_order(&self) -> &[usize] {
        &self.competitor_order
    }

    /// Whether stage `stage` has nothing left to release.
    pub fn is_stage_complete(&self, index: &DatasetIndex, stage: usize) -> bool {
        self.released(stage) >= index.total_for(stage)
    }

    /// Completion fraction of a stage in `0.0..=1.0`. Empty stages count as complete.
    pub fn stage_fraction(&self, index: &DatasetIndex, stage: usize) -> f64 {
        match index.total_for(stage) {
            0 => 1.0,
            total => self.released(stage) as f64 / total as f64,
        }
    }

    /// Whether `competitor` may release its record for `stage` next.
    pub fn is_next_stage_for(&self, competitor: usize, stage: usize) -> bool {
        self.last_released(competitor) == stage.checked_sub(1)
    }

    /// Move the cursor past every fully released stage.
    ///
    /// Bounded by the stage count; returns the new cursor.
    pub fn advance_cursor(&mut self, index: &DatasetIndex) -> usize {
        while self.current_stage < index.stage_count()
            && self.is_stage_complete(index, self.current_stage)
        {
            self.current_stage += 1;
        }
        self.current_stage
    }

    /// First stage at or after the cursor that still has records to release,
    /// without moving the cursor.
    pub fn peek_active_stage(&self, index: &DatasetIndex) -> Option<usize> {
        (self.current_stage..index.stage_count()).find(|&s| !self.is_stage_complete(index, s))
    }

    /// Account one released record.
    pub(crate) fn record_release(&mut self, index: &DatasetIndex, competitor: usize, stage: usize) {
        debug_assert!(self.is_next_stage_for(competitor, stage));
        debug_assert!(self.released(stage) < index.total_for(stage));

        self.last_released[competitor] = Some(stage);
        self.released_per_stage[stage] += 1;
        self.total_released += 1;

        debug_assert_eq!(
            self.total_released,
            self.released_per_stage.iter().sum::<usize>()
        );
    }
}
