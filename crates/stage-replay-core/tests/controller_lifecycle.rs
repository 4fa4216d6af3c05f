//! ReplayController lifecycle against the in-memory repository.
//!
//! Timer-driven tests run on a paused tokio clock, so sleeping advances time
//! instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use stage_replay_core::{
    BatchSizing, CompetitorId, EventDataset, EventId, EventInfo, LogCategory, ReplayConfig,
    ReplayController, ReplayError, ReplayParams, RunState, TimingRecord, TimingRepository,
};
use timing_store::MemoryTimingRepository;
use tokio::time::sleep;

const INTERVAL: Duration = Duration::from_secs(5);

fn dataset(event: &str, competitors: u32, stages: u32) -> EventDataset {
    EventDataset {
        event: EventInfo {
            id: EventId::new(event),
            name: format!("Rally {event}"),
        },
        records: (1..=competitors)
            .flat_map(|c| (1..=stages).map(move |s| TimingRecord::new(c, s, 300.0 + f64::from(c))))
            .collect(),
    }
}

fn config(size: usize, threshold: f64) -> ReplayConfig {
    ReplayConfig {
        batch: BatchSizing::Fixed { size },
        interval: INTERVAL,
        overlap_threshold: threshold,
        order_variation: 0.0,
        seed: Some(3),
    }
}

fn controller_with(datasets: Vec<EventDataset>) -> ReplayController<MemoryTimingRepository> {
    let repo = MemoryTimingRepository::new();
    for ds in datasets {
        repo.insert_event(ds);
    }
    ReplayController::new(Arc::new(repo))
}

async fn ready(size: usize, threshold: f64) -> ReplayController<MemoryTimingRepository> {
    let controller = controller_with(vec![dataset("ev-1", 3, 2)]);
    controller
        .initialize_with(&EventId::new("ev-1"), config(size, threshold))
        .await
        .expect("initialize");
    controller
}

/// Sleep just past `n` ticks.
async fn ticks(n: u32) {
    sleep(INTERVAL * n + Duration::from_millis(10)).await;
}

#[tokio::test]
async fn initialize_reports_dataset_shape() {
    let controller = controller_with(vec![dataset("ev-1", 4, 3)]);
    let report = controller
        .initialize(&EventId::new("ev-1"), ReplayParams::default())
        .await
        .unwrap();

    assert_eq!(report.event_name, "Rally ev-1");
    assert_eq!(report.total_records, 12);
    assert_eq!(report.competitor_count, 4);
    assert_eq!(report.stage_count, 3);
    assert_eq!(report.skipped_records, 0);
    assert_eq!(report.interval_ms, 5000);

    let status = controller.status().await;
    assert_eq!(status.state, RunState::Ready);
    assert_eq!(status.total_released, 0);
    assert_eq!(status.current_stage.map(|s| s.0), Some(1));
}

#[tokio::test]
async fn initialize_failures_leave_prior_run_intact() {
    let empty = EventDataset {
        records: vec![],
        ..dataset("ev-empty", 0, 0)
    };
    let controller = controller_with(vec![dataset("ev-1", 3, 2), empty]);

    let err = controller
        .initialize(&EventId::new("nope"), ReplayParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::NotFound(_)));
    assert_eq!(controller.status().await.state, RunState::Uninitialized);

    controller
        .initialize_with(&EventId::new("ev-1"), config(2, 0.9))
        .await
        .unwrap();
    controller.start().await.unwrap();

    let err = controller
        .initialize(&EventId::new("ev-empty"), ReplayParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::EmptyDataset(_)));

    let status = controller.status().await;
    assert_eq!(status.state, RunState::Running);
    assert_eq!(status.event.unwrap().id, EventId::new("ev-1"));
    controller.shutdown().await;
}

#[tokio::test]
async fn control_before_initialize_is_invalid() {
    let controller = controller_with(vec![]);
    for err in [
        controller.start().await.unwrap_err(),
        controller.pause().await.unwrap_err(),
        controller.stop().await.unwrap_err(),
        controller.reset(None).await.unwrap_err(),
        controller.drain_one_batch().await.unwrap_err(),
    ] {
        assert!(matches!(
            err,
            ReplayError::InvalidState {
                state: RunState::Uninitialized,
                ..
            }
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn ticker_releases_one_batch_per_interval() {
    let controller = ready(2, 0.9).await;
    let report = controller.start().await.unwrap();
    assert_eq!(report.interval_ms, 5000);
    assert!(!report.already_running);
    assert!(controller.status().await.started_at.is_some());

    sleep(Duration::from_secs(4)).await;
    assert_eq!(controller.status().await.total_released, 0);

    sleep(Duration::from_secs(2)).await;
    let status = controller.status().await;
    assert_eq!(status.total_released, 2);
    assert_eq!(status.persisted, 2);
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn start_twice_does_not_double_arm() {
    let controller = ready(2, 0.9).await;
    controller.start().await.unwrap();
    let again = controller.start().await.unwrap();
    assert!(again.already_running);

    ticks(1).await;
    assert_eq!(controller.status().await.total_released, 2);
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn paused_ticks_release_nothing() {
    let controller = ready(2, 0.9).await;
    controller.start().await.unwrap();
    assert!(controller.pause().await.unwrap().paused);
    assert_eq!(controller.status().await.state, RunState::Paused);

    ticks(4).await;
    assert_eq!(controller.status().await.total_released, 0);

    let resumed = controller.resume().await.unwrap();
    assert!(!resumed.already_running);
    ticks(1).await;
    assert!(controller.status().await.total_released > 0);
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pause_toggles_back_to_running() {
    let controller = ready(2, 0.9).await;
    controller.start().await.unwrap();
    assert!(controller.pause().await.unwrap().paused);
    assert!(!controller.pause().await.unwrap().paused);
    assert_eq!(controller.status().await.state, RunState::Running);
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_keeps_progress_and_disarms() {
    let controller = ready(2, 0.9).await;
    assert!(matches!(
        controller.stop().await,
        Err(ReplayError::InvalidState {
            state: RunState::Ready,
            ..
        })
    ));

    controller.start().await.unwrap();
    ticks(1).await;
    let stopped = controller.stop().await.unwrap();
    assert_eq!(stopped.total_released, 2);
    assert_eq!(stopped.total_records, 6);

    ticks(6).await;
    let status = controller.status().await;
    assert_eq!(status.state, RunState::Ready);
    assert_eq!(status.total_released, 2);

    controller.start().await.unwrap();
    ticks(1).await;
    assert_eq!(controller.status().await.total_released, 3);
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn run_completes_and_disarms() {
    let controller = ready(2, 0.9).await;
    controller.start().await.unwrap();

    // 2 + 1 into PS1, 2 + 1 into PS2, completion on the fifth tick.
    ticks(4).await;
    let status = controller.status().await;
    assert_eq!(status.total_released, 6);
    assert_eq!(status.state, RunState::Running);

    ticks(1).await;
    let status = controller.status().await;
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.percent, 100.0);
    assert_eq!(status.estimated_seconds_remaining, 0);
    assert!(status.active_stages.is_empty());
    assert_eq!(status.persisted, 6);

    let log = controller.log().await;
    assert_eq!(log[0].category, LogCategory::Completed);

    assert!(matches!(
        controller.start().await,
        Err(ReplayError::InvalidState {
            state: RunState::Completed,
            ..
        })
    ));

    let released = controller
        .repository()
        .released_records(&EventId::new("ev-1"))
        .await
        .unwrap();
    assert_eq!(released.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn reset_zeroes_progress_and_cancels_ticker() {
    let controller = ready(2, 0.0).await;
    controller.start().await.unwrap();
    ticks(2).await;
    assert!(controller.status().await.total_released > 0);

    let report = controller.reset(None).await.unwrap();
    assert_eq!(report.total_records, 6);

    ticks(3).await;
    let status = controller.status().await;
    assert_eq!(status.state, RunState::Ready);
    assert_eq!(status.total_released, 0);
    assert_eq!(status.persisted, 0);
    assert_eq!(status.started_at, None);
    assert_eq!(controller.log().await[0].category, LogCategory::Reset);

    controller.start().await.unwrap();
    ticks(1).await;
    assert_eq!(controller.status().await.total_released, 2);
    controller.shutdown().await;
}

#[tokio::test]
async fn reset_with_event_switches_dataset() {
    let controller = controller_with(vec![dataset("ev-1", 3, 2), dataset("ev-2", 5, 4)]);
    controller
        .initialize_with(&EventId::new("ev-1"), config(2, 0.7))
        .await
        .unwrap();

    let same = controller.reset(Some(EventId::new("ev-1"))).await.unwrap();
    assert_eq!(same.total_records, 6);

    let other = controller.reset(Some(EventId::new("ev-2"))).await.unwrap();
    assert_eq!(other.event_id, EventId::new("ev-2"));
    assert_eq!(other.total_records, 20);
    assert_eq!(
        controller.status().await.event.map(|e| e.name),
        Some("Rally ev-2".to_string())
    );

    let missing = controller.reset(Some(EventId::new("gone"))).await;
    assert!(matches!(missing, Err(ReplayError::NotFound(_))));
    assert_eq!(controller.status().await.total_records, 20);
}

#[tokio::test]
async fn concurrent_resets_serialize() {
    let controller = ready(2, 0.7).await;
    controller.drain_one_batch().await.unwrap();

    let (a, b) = tokio::join!(controller.reset(None), controller.reset(None));
    assert!(a.is_ok() && b.is_ok());

    let status = controller.status().await;
    assert_eq!(status.state, RunState::Ready);
    assert_eq!(status.total_released, 0);
}

#[tokio::test(start_paused = true)]
async fn persist_failures_do_not_stop_the_run() {
    let controller = ready(3, 0.7).await;
    controller
        .repository()
        .fail_persist_for(CompetitorId(1));

    controller.start().await.unwrap();
    ticks(3).await;

    let status = controller.status().await;
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.total_released, 6);
    assert_eq!(status.persist_failures, 2);
    assert_eq!(status.persisted, 4);

    let released = controller
        .repository()
        .released_records(&EventId::new("ev-1"))
        .await
        .unwrap();
    assert_eq!(released.len(), 4);
    assert!(released.iter().all(|r| r.competitor != CompetitorId(1)));

    let log = controller.log().await;
    assert!(log.iter().any(|e| e.category == LogCategory::Error));
}

#[tokio::test]
async fn drain_pulls_batches_only_when_idle() {
    let controller = ready(2, 0.9).await;

    let first = controller.drain_one_batch().await.unwrap();
    assert_eq!(first.records.len(), 2);
    assert_eq!(controller.status().await.total_released, 2);
    // Pulled records go to the caller, not the repository.
    assert_eq!(controller.status().await.persisted, 0);

    controller.start().await.unwrap();
    assert!(controller.drain_one_batch().await.unwrap().is_empty());
    controller.stop().await.unwrap();

    let mut pulled = 2;
    loop {
        let outcome = controller.drain_one_batch().await.unwrap();
        pulled += outcome.records.len();
        if outcome.completed {
            break;
        }
    }
    assert_eq!(pulled, 6);
    assert_eq!(controller.status().await.state, RunState::Completed);

    let after = controller.drain_one_batch().await.unwrap();
    assert!(after.completed && after.is_empty());
}

#[tokio::test]
async fn log_is_newest_first_and_cleared_on_initialize() {
    let controller = ready(2, 0.9).await;
    let log = controller.log().await;
    let categories: Vec<LogCategory> = log.iter().map(|e| e.category).collect();
    assert_eq!(
        categories,
        vec![
            LogCategory::Timer,
            LogCategory::Config,
            LogCategory::Info,
            LogCategory::Init
        ]
    );

    controller.drain_one_batch().await.unwrap();
    assert_eq!(controller.log().await[0].category, LogCategory::Batch);

    controller
        .initialize_with(&EventId::new("ev-1"), config(2, 0.9))
        .await
        .unwrap();
    assert_eq!(controller.log().await.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_further_ticks() {
    let controller = ready(2, 0.9).await;
    controller.start().await.unwrap();
    ticks(1).await;
    controller.shutdown().await;

    ticks(5).await;
    assert_eq!(controller.status().await.total_released, 2);
}
