//! Release scheduler behaviour over whole runs.
//!
//! Drives `ReleaseScheduler` directly (no timer) and checks the release
//! invariants after every tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stage_replay_core::{
    BatchOutcome, BatchSizing, CompetitorId, DatasetIndex, ReleaseScheduler, ReplayConfig,
    ReplayParams, RunState, StageId, TimingRecord,
};

fn fixed(size: usize, threshold: f64) -> ReplayConfig {
    ReplayConfig {
        batch: BatchSizing::Fixed { size },
        interval: Duration::from_secs(5),
        overlap_threshold: threshold,
        order_variation: 0.0,
        seed: Some(11),
    }
}

fn grid(competitors: u32, stages: u32) -> Vec<TimingRecord> {
    (1..=competitors)
        .flat_map(|c| (1..=stages).map(move |s| TimingRecord::new(c, s, 240.0 + f64::from(c))))
        .collect()
}

fn scheduler(records: Vec<TimingRecord>, config: ReplayConfig) -> ReleaseScheduler {
    let index = DatasetIndex::build(records).expect("non-empty dataset");
    let mut scheduler = ReleaseScheduler::new(Arc::new(index), config);
    scheduler.start().expect("start from ready");
    scheduler
}

fn stages_in(outcome: &BatchOutcome) -> HashSet<StageId> {
    outcome.records.iter().map(|r| r.stage).collect()
}

#[test]
fn scenario_a_high_threshold_keeps_stages_sequential() {
    let mut s = scheduler(grid(3, 2), fixed(2, 0.9));

    let t1 = s.tick();
    let t2 = s.tick();
    assert_eq!(t1.records.len(), 2);
    assert_eq!(t2.records.len(), 1);
    assert_eq!(stages_in(&t1), HashSet::from([StageId(1)]));
    assert_eq!(stages_in(&t2), HashSet::from([StageId(1)]));
    assert_eq!(s.progress().released(0), 3);
    assert_eq!(s.progress().released(1), 0);

    let t3 = s.tick();
    let t4 = s.tick();
    assert_eq!(stages_in(&t3), HashSet::from([StageId(2)]));
    assert_eq!(t3.records.len() + t4.records.len(), 3);
    assert_eq!(s.progress().total_released(), 6);
    assert_eq!(s.state(), RunState::Running);

    let t5 = s.tick();
    assert!(t5.just_completed);
    assert_eq!(s.state(), RunState::Completed);
}

#[test]
fn scenario_b_zero_threshold_overlaps_on_second_tick() {
    let mut s = scheduler(grid(3, 2), fixed(2, 0.0));

    let t1 = s.tick();
    assert_eq!(stages_in(&t1), HashSet::from([StageId(1)]));

    let t2 = s.tick();
    assert_eq!(stages_in(&t2), HashSet::from([StageId(1), StageId(2)]));
    assert_eq!(t2.live_stages.len(), 2);
    assert_eq!(t2.released_by_stage[0].competitors.len(), 1);
    assert_eq!(t2.released_by_stage[1].competitors.len(), 1);
}

#[test]
fn scenario_c_unreachable_records_are_not_counted() {
    let mut records = grid(4, 3);
    // Competitor 2 skipped stage 2: its stage 3 can never be released.
    records.retain(|r| !(r.competitor == CompetitorId(2) && r.stage == StageId(2)));
    // Competitor 4 never started stage 1.
    records.retain(|r| !(r.competitor == CompetitorId(4) && r.stage == StageId(1)));
    let kept = records.len() - 1 - 2;

    let index = DatasetIndex::build(records).unwrap();
    assert_eq!(index.total_records(), kept);
    assert_eq!(index.skipped_records(), 3);
    assert_eq!(index.competitor_count(), 3);

    let mut s = ReleaseScheduler::new(Arc::new(index), fixed(3, 0.5));
    s.start().unwrap();
    let mut released = 0;
    for _ in 0..50 {
        let outcome = s.tick();
        released += outcome.records.len();
        if outcome.completed {
            break;
        }
    }
    assert_eq!(s.state(), RunState::Completed);
    assert_eq!(released, kept);
}

/// Dataset with random gaps: some competitors retire part way through.
fn retiring_field(seed: u64, competitors: u32, stages: u32) -> Vec<TimingRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::new();
    for c in 1..=competitors {
        let finished = if rng.gen_bool(0.2) {
            rng.gen_range(1..=stages)
        } else {
            stages
        };
        for s in 1..=finished {
            records.push(TimingRecord::new(c, s, rng.gen_range(180.0..420.0)));
        }
    }
    records
}

#[test]
fn release_invariants_hold_on_every_tick() {
    for seed in [1, 2, 3, 4, 5] {
        let index = Arc::new(DatasetIndex::build(retiring_field(seed, 60, 5)).unwrap());
        let config = ReplayConfig {
            batch: BatchSizing::Range { min: 3, max: 12 },
            interval: Duration::from_secs(1),
            overlap_threshold: 0.5,
            order_variation: 6.0,
            seed: Some(seed),
        };
        let mut s = ReleaseScheduler::new(Arc::clone(&index), config);
        s.start().unwrap();

        let stage_pos = |id: StageId| index.stages().iter().position(|st| st.id == id).unwrap();
        let comp_pos =
            |id: CompetitorId| index.competitors().iter().position(|c| c.id == id).unwrap();

        let mut seen = HashSet::new();
        let mut last: Vec<Option<usize>> = vec![None; index.competitor_count()];
        let mut ticks = 0;

        loop {
            let before: Vec<f64> = (0..index.stage_count())
                .map(|p| s.progress().stage_fraction(&index, p))
                .collect();
            let released_before: Vec<usize> = s.progress().released_per_stage().to_vec();
            let cursor_before = s.progress().current_stage();

            let outcome = s.tick();
            ticks += 1;
            assert!(ticks < 1000, "run did not complete");
            if outcome.completed {
                break;
            }

            for record in &outcome.records {
                assert!(seen.insert(record.key()), "released twice: {:?}", record.key());
                let c = comp_pos(record.competitor);
                let p = stage_pos(record.stage);
                assert_eq!(last[c], p.checked_sub(1), "stage skipped for {}", record.competitor);
                last[c] = Some(p);
            }

            let progress = s.progress();
            assert!(progress.current_stage() >= cursor_before);
            assert_eq!(
                progress.total_released(),
                progress.released_per_stage().iter().sum::<usize>()
            );
            let mut partial = 0;
            for p in 0..index.stage_count() {
                let released = progress.released(p);
                assert!(released <= index.total_for(p));
                if released > 0 && released < index.total_for(p) {
                    partial += 1;
                }
                // A stage only opens once its predecessor reached the threshold.
                if p > 0 && released_before[p] == 0 && released > 0 {
                    assert!(before[p - 1] >= 0.5, "stage {p} opened early");
                }
            }
            assert!(partial <= 2, "{partial} stages partially released");
        }

        assert_eq!(seen.len(), index.total_records());
        assert_eq!(s.progress().total_released(), index.total_records());
    }
}

#[test]
fn reset_then_start_begins_from_zero() {
    let mut s = scheduler(grid(20, 3), fixed(7, 0.3));
    for _ in 0..4 {
        s.tick();
    }
    assert!(s.progress().total_released() > 0);

    s.reset();
    s.start().unwrap();
    assert_eq!(s.progress().total_released(), 0);
    assert_eq!(s.progress().current_stage(), 0);
    let order: HashSet<usize> = s.progress().competitor_order().iter().copied().collect();
    assert_eq!(order, (0..20).collect());
}

#[test]
fn reset_draws_a_new_competitor_order() {
    let config = ReplayConfig {
        order_variation: 1000.0,
        ..fixed(5, 0.7)
    };
    let mut s = scheduler(grid(30, 2), config);
    let first = s.progress().competitor_order().to_vec();
    assert_ne!(first, (0..30).collect::<Vec<_>>());

    s.tick();
    s.reset();
    let second = s.progress().competitor_order().to_vec();
    assert_ne!(first, second);

    let mut sorted = second;
    sorted.sort_unstable();
    assert_eq!(sorted, (0..30).collect::<Vec<_>>());
}

#[test]
fn oversized_order_variation_still_initializes() {
    let config = ReplayParams {
        order_variation: Some(f64::MAX),
        batch_size: Some(10),
        seed: Some(9),
        ..Default::default()
    }
    .resolve(40);

    let mut s = scheduler(grid(20, 2), config);
    let mut released = 0;
    for _ in 0..20 {
        let outcome = s.tick();
        released += outcome.records.len();
        if outcome.completed {
            break;
        }
    }
    assert_eq!(s.state(), RunState::Completed);
    assert_eq!(released, 40);
}

#[test]
fn start_twice_does_not_reset_progress() {
    let mut s = scheduler(grid(10, 2), fixed(4, 0.7));
    s.tick();
    s.start().unwrap();
    assert_eq!(s.progress().total_released(), 4);
    assert_eq!(s.tick().records.len(), 4);
}

#[test]
fn default_sized_batches_stay_in_range() {
    let config = ReplayConfig {
        seed: Some(5),
        ..ReplayConfig::default()
    };
    let mut s = scheduler(grid(200, 2), config);
    for _ in 0..5 {
        let n = s.tick().records.len();
        assert!((30..=50).contains(&n), "batch of {n}");
    }
}
