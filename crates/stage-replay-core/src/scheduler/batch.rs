//! Batch production: which records a tick releases.

use serde::Serialize;
use timing_store::{CompetitorId, StageId, TimingRecord};

use super::progress::ReleaseProgress;
use crate::dataset::DatasetIndex;

/// Share of an overlapping batch earmarked for the main stage, in percent.
pub const MAIN_STAGE_SHARE_PERCENT: usize = 70;

/// Stages allowed to release in the same tick.
pub const MAX_CONCURRENT_STAGES: usize = 2;

/// Completion of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageProgress {
    pub stage: StageId,
    pub position: usize,
    pub released: usize,
    pub total: usize,
    /// 0.0..=100.0
    pub percent: f64,
}

impl StageProgress {
    pub(crate) fn of(index: &DatasetIndex, progress: &ReleaseProgress, position: usize) -> Option<Self> {
        let stage = index.stage(position)?;
        Some(Self {
            stage: stage.id,
            position,
            released: progress.released(position),
            total: stage.total,
            percent: progress.stage_fraction(index, position) * 100.0,
        })
    }
}

/// Competitors released into one stage by one batch, in release order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRelease {
    pub stage: StageId,
    pub competitors: Vec<CompetitorId>,
}

/// Result of one batch-production call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub records: Vec<TimingRecord>,
    /// The run has released everything
    pub completed: bool,
    /// This call performed the transition to `Completed`
    pub just_completed: bool,
    pub total_released: usize,
    pub total_records: usize,
    /// Overall completion, 0.0..=100.0
    pub percent: f64,
    /// Stages that were allowed to release this tick (main first)
    pub live_stages: Vec<StageProgress>,
    pub released_by_stage: Vec<StageRelease>,
}

impl BatchOutcome {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `"PS1: 12,4,9 | PS2: 3"` style summary of who was released where.
    pub fn detail(&self) -> String {
        self.released_by_stage
            .iter()
            .filter(|s| !s.competitors.is_empty())
            .map(|s| {
                let ids: Vec<String> = s.competitors.iter().map(ToString::to_string).collect();
                format!("{}: {}", s.stage, ids.join(","))
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// How many of `batch_size` slots go to the main stage when overlapping.
pub fn main_stage_share(batch_size: usize) -> usize {
    (batch_size * MAIN_STAGE_SHARE_PERCENT).div_ceil(100)
}

/// Release one batch of `batch_size` records into `progress`.
///
/// Caller guarantees at least one record is still unreleased.
pub(crate) fn release_batch(
    index: &DatasetIndex,
    progress: &mut ReleaseProgress,
    batch_size: usize,
    overlap_threshold: f64,
) -> (Vec<TimingRecord>, Vec<StageProgress>, Vec<StageRelease>) {
    let main = progress.advance_cursor(index);
    let next = main + 1;

    let overlap = next < index.stage_count()
        && progress.stage_fraction(index, main) >= overlap_threshold;

    let mut targets = vec![(
        main,
        if overlap {
            main_stage_share(batch_size)
        } else {
            batch_size
        },
    )];
    if overlap {
        targets.push((next, 0));
    }
    debug_assert!(targets.len() <= MAX_CONCURRENT_STAGES);

    let mut records = Vec::with_capacity(batch_size);
    let mut released_by_stage = Vec::with_capacity(targets.len());

    for (i, (stage, earmark)) in targets.iter().copied().enumerate() {
        // Slots the main stage could not fill roll over to the next one.
        let earmark = if i == 0 {
            earmark
        } else {
            batch_size - records.len()
        };

        let chosen: Vec<usize> = progress
            .competitor_order()
            .iter()
            .copied()
            .filter(|&c| {
                progress.is_next_stage_for(c, stage)
                    && index.competitor(c).and_then(|comp| comp.record(stage)).is_some()
            })
            .take(earmark)
            .collect();

        let mut ids = Vec::with_capacity(chosen.len());
        for c in chosen {
            let Some(competitor) = index.competitor(c) else {
                continue;
            };
            let Some(record) = competitor.record(stage) else {
                continue;
            };
            records.push(record.clone());
            ids.push(competitor.id);
            progress.record_release(index, c, stage);
        }

        if let Some(s) = index.stage(stage) {
            released_by_stage.push(StageRelease {
                stage: s.id,
                competitors: ids,
            });
        }
    }

    let live_stages = targets
        .iter()
        .filter_map(|(stage, _)| StageProgress::of(index, progress, *stage))
        .collect();

    (records, live_stages, released_by_stage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_share_rounds_up() {
        assert_eq!(main_stage_share(2), 2);
        assert_eq!(main_stage_share(3), 3);
        assert_eq!(main_stage_share(10), 7);
        assert_eq!(main_stage_share(30), 21);
        assert_eq!(main_stage_share(50), 35);
    }

    #[test]
    fn detail_lists_non_empty_stages() {
        let outcome = BatchOutcome {
            released_by_stage: vec![
                StageRelease {
                    stage: StageId(1),
                    competitors: vec![CompetitorId(12), CompetitorId(4)],
                },
                StageRelease {
                    stage: StageId(2),
                    competitors: vec![],
                },
            ],
            ..Default::default()
        };
        assert_eq!(outcome.detail(), "PS1: 12,4");
    }

    fn grid(competitors: u32, stages: u32) -> DatasetIndex {
        DatasetIndex::build(
            (1..=competitors)
                .flat_map(|c| (1..=stages).map(move |s| TimingRecord::new(c, s, 60.0)))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn no_overlap_below_threshold() {
        let index = grid(10, 2);
        let mut progress = ReleaseProgress::new(&index, (0..10).collect());
        let (records, live, _) = release_batch(&index, &mut progress, 5, 0.7);
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.stage == StageId(1)));
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn overlap_splits_seventy_thirty() {
        let index = grid(10, 2);
        let mut progress = ReleaseProgress::new(&index, (0..10).collect());
        release_batch(&index, &mut progress, 7, 0.7);

        // Stage 1 at 70%: 7 slots for main, 3 for the next stage.
        let (records, live, by_stage) = release_batch(&index, &mut progress, 10, 0.7);
        assert_eq!(live.len(), 2);
        let main = records.iter().filter(|r| r.stage == StageId(1)).count();
        let next = records.iter().filter(|r| r.stage == StageId(2)).count();
        // Only 3 left in stage 1; the 7 spare slots go to stage 2 in order.
        assert_eq!(main, 3);
        assert_eq!(next, 7);
        assert_eq!(
            by_stage[1].competitors,
            (1..=7).map(CompetitorId).collect::<Vec<_>>()
        );
    }

    #[test]
    fn main_stage_release_feeds_next_stage_in_same_batch() {
        let index = grid(2, 3);
        let mut progress = ReleaseProgress::new(&index, vec![0, 1]);
        let (records, live, by_stage) = release_batch(&index, &mut progress, 10, 0.0);

        let stage1 = records.iter().filter(|r| r.stage == StageId(1)).count();
        let stage2 = records.iter().filter(|r| r.stage == StageId(2)).count();
        assert_eq!((stage1, stage2), (2, 2));
        assert_eq!(live.len(), 2);
        assert_eq!(by_stage[1].competitors, vec![CompetitorId(1), CompetitorId(2)]);
        assert_eq!(progress.last_released(0), Some(1));
        assert_eq!(progress.released(2), 0);
    }

    #[test]
    fn next_stage_prefers_competitor_order_over_release_time() {
        let index = grid(10, 2);
        let mut progress = ReleaseProgress::new(&index, vec![9, 0, 1, 2, 3, 4, 5, 6, 7, 8]);
        // Competitor 10 is last to finish stage 1 but first in the order.
        release_batch(&index, &mut progress, 9, 0.95);
        assert_eq!(progress.last_released(9), Some(0));
        assert_eq!(progress.last_released(8), None);

        let (_, _, by_stage) = release_batch(&index, &mut progress, 4, 0.9);
        assert_eq!(by_stage[0].competitors, vec![CompetitorId(9)]);
        assert_eq!(
            by_stage[1].competitors,
            vec![CompetitorId(10), CompetitorId(1), CompetitorId(2)]
        );
    }

    #[test]
    fn serves_competitors_in_order() {
        let index = grid(4, 1);
        let mut progress = ReleaseProgress::new(&index, vec![2, 0, 3, 1]);
        let (_, _, by_stage) = release_batch(&index, &mut progress, 3, 0.7);
        assert_eq!(
            by_stage[0].competitors,
            vec![CompetitorId(3), CompetitorId(1), CompetitorId(4)]
        );
    }
}
