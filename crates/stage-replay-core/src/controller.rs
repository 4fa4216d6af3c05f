//! Async owner of one replay run.
//!
//! [`ReplayController`] keeps the scheduler behind a `tokio::sync::Mutex`,
//! drives it from a spawned ticker task and forwards released records to a
//! [`TimingRepository`]. Control operations are serialized by a second mutex
//! so two resets can never interleave, and repository I/O always happens with
//! the state lock released.
//!
//! The ticker carries a generation number. Stop, reset, initialize and
//! shutdown bump the generation and cancel the task; a tick that observes a
//! stale generation exits without touching state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use timing_store::{EventId, EventInfo, StageId, TimingRecord, TimingRepository};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn, Instrument};

use crate::config::{ReplayConfig, ReplayParams};
use crate::dataset::DatasetIndex;
use crate::error::{ReplayError, ReplayResult};
use crate::event_log::{EventLog, LogCategory, LogEntry};
use crate::metrics::METRICS;
use crate::obs;
use crate::scheduler::{BatchOutcome, ReleaseScheduler, RunState, StageProgress, StartOutcome};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Returned by `initialize` and `reset`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitReport {
    pub event_id: EventId,
    pub event_name: String,
    pub total_records: usize,
    pub competitor_count: usize,
    pub stage_count: usize,
    pub skipped_records: usize,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub interval_ms: u64,
    pub already_running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PauseReport {
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub total_released: usize,
    pub total_records: usize,
}

/// Full replay status. Counters are zero before the first initialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStatus {
    pub state: RunState,
    pub event: Option<EventInfo>,
    pub total_released: usize,
    pub total_records: usize,
    pub percent: f64,
    pub active_stages: Vec<StageProgress>,
    pub current_stage: Option<StageId>,
    pub estimated_seconds_remaining: u64,
    pub interval_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub competitor_count: usize,
    pub stage_count: usize,
    /// Records persisted by the ticker this run
    pub persisted: u64,
    pub persist_failures: u64,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Where the run's configuration came from; re-resolved when reset loads a
/// different dataset.
#[derive(Debug, Clone)]
enum Settings {
    Params(ReplayParams),
    Config(ReplayConfig),
}

impl Settings {
    fn resolve(&self, total_records: usize) -> ReplayConfig {
        match self {
            Settings::Params(params) => params.resolve(total_records),
            Settings::Config(config) => config.clone(),
        }
    }
}

struct Run {
    event: EventInfo,
    run_id: String,
    settings: Settings,
    scheduler: ReleaseScheduler,
}

struct Ticker {
    generation: u64,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    run: Option<Run>,
    log: EventLog,
    ticker: Option<Ticker>,
    /// Bumped whenever a ticker is armed or disarmed
    generation: u64,
    /// Bumped on initialize/reset; stale persist results are discarded
    epoch: u64,
    persisted: u64,
    persist_failures: u64,
}

impl Inner {
    fn run_mut(&mut self, operation: &'static str) -> ReplayResult<&mut Run> {
        self.run
            .as_mut()
            .ok_or_else(|| ReplayError::invalid(operation, RunState::Uninitialized))
    }

    /// Cancel the ticker, if any. Returns its handle so the caller may wait.
    fn disarm(&mut self) -> Option<JoinHandle<()>> {
        self.generation += 1;
        self.ticker.take().map(|ticker| {
            // The receiver may already be gone if the task finished.
            let _ = ticker.cancel.send(());
            debug!(generation = ticker.generation, "ticker disarmed");
            ticker.handle
        })
    }

    fn install(&mut self, event: EventInfo, settings: Settings, scheduler: ReleaseScheduler) {
        self.disarm();
        self.epoch += 1;
        self.persisted = 0;
        self.persist_failures = 0;
        self.run = Some(Run {
            event,
            run_id: uuid::Uuid::new_v4().to_string(),
            settings,
            scheduler,
        });
    }

    /// Record a produced batch in the log and metrics.
    fn account(&mut self, event_id: &str, outcome: &BatchOutcome) {
        if outcome.just_completed {
            let elapsed_ms = self
                .run
                .as_ref()
                .and_then(|r| r.scheduler.started_at())
                .map_or(0, |t| (Utc::now() - t).num_milliseconds().max(0) as u64);
            self.log.push(
                LogCategory::Completed,
                format!("replay finished, {} records released", outcome.total_released),
            );
            obs::emit_replay_completed(event_id, outcome.total_records, elapsed_ms);
            METRICS.inc_runs_completed();
            METRICS.flush();
            return;
        }
        if outcome.is_empty() {
            return;
        }

        METRICS.record_batch(outcome.records.len());
        obs::emit_batch_released(
            event_id,
            outcome.records.len(),
            outcome.total_released,
            outcome.percent,
        );
        self.log.push_detail(
            LogCategory::Batch,
            format!(
                "{} records ({:.0}%)",
                outcome.records.len(),
                outcome.percent
            ),
            outcome.detail(),
        );
        if outcome.live_stages.len() > 1 {
            let live: Vec<String> = outcome
                .live_stages
                .iter()
                .map(|s| format!("{}({:.0}%)", s.stage, s.percent))
                .collect();
            self.log.push(LogCategory::LiveStages, live.join(", "));
        }
    }

    fn status(&self) -> ReplayStatus {
        let Some(run) = self.run.as_ref() else {
            return ReplayStatus {
                state: RunState::Uninitialized,
                event: None,
                total_released: 0,
                total_records: 0,
                percent: 0.0,
                active_stages: Vec::new(),
                current_stage: None,
                estimated_seconds_remaining: 0,
                interval_ms: 0,
                started_at: None,
                competitor_count: 0,
                stage_count: 0,
                persisted: 0,
                persist_failures: 0,
            };
        };
        let s = run.scheduler.status();
        ReplayStatus {
            state: s.state,
            event: Some(run.event.clone()),
            total_released: s.total_released,
            total_records: s.total_records,
            percent: s.percent,
            active_stages: s.active_stages,
            current_stage: s.current_stage,
            estimated_seconds_remaining: s.estimated_seconds_remaining,
            interval_ms: s.interval_ms,
            started_at: s.started_at,
            competitor_count: s.competitor_count,
            stage_count: s.stage_count,
            persisted: self.persisted,
            persist_failures: self.persist_failures,
        }
    }
}

fn init_report(event: &EventInfo, scheduler: &ReleaseScheduler) -> InitReport {
    let index = scheduler.index();
    InitReport {
        event_id: event.id.clone(),
        event_name: event.name.clone(),
        total_records: index.total_records(),
        competitor_count: index.competitor_count(),
        stage_count: index.stage_count(),
        skipped_records: index.skipped_records(),
        interval_ms: scheduler.config().interval.as_millis() as u64,
    }
}

fn log_run_header(log: &mut EventLog, report: &InitReport, config: &ReplayConfig) {
    log.push(LogCategory::Init, format!("event: {}", report.event_name));
    log.push(
        LogCategory::Info,
        format!(
            "{} records, {} competitors, {} stages",
            report.total_records, report.competitor_count, report.stage_count
        ),
    );
    if report.skipped_records > 0 {
        log.push(
            LogCategory::Info,
            format!("{} unreleasable records skipped", report.skipped_records),
        );
    }
    log.push(
        LogCategory::Config,
        format!(
            "batch {:?}, overlap {:.0}%, order variation {}",
            config.batch,
            config.overlap_threshold * 100.0,
            config.order_variation
        ),
    );
    log.push(
        LogCategory::Timer,
        format!("release interval {:.1}s", config.interval.as_secs_f64()),
    );
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns a replay run for one repository.
pub struct ReplayController<R: TimingRepository + 'static> {
    repo: Arc<R>,
    inner: Arc<Mutex<Inner>>,
    control: Mutex<()>,
}

impl<R: TimingRepository + 'static> ReplayController<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            inner: Arc::new(Mutex::new(Inner::default())),
            control: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    /// Load `event_id` and prepare a fresh run in `Ready`.
    ///
    /// On failure the previous run, if any, is left untouched.
    pub async fn initialize(
        &self,
        event_id: &EventId,
        params: ReplayParams,
    ) -> ReplayResult<InitReport> {
        self.initialize_inner(event_id, Settings::Params(params))
            .await
    }

    /// Like [`initialize`](Self::initialize) with an already validated config.
    pub async fn initialize_with(
        &self,
        event_id: &EventId,
        config: ReplayConfig,
    ) -> ReplayResult<InitReport> {
        self.initialize_inner(event_id, Settings::Config(config))
            .await
    }

    #[instrument(skip_all, fields(event_id = %event_id))]
    async fn initialize_inner(
        &self,
        event_id: &EventId,
        settings: Settings,
    ) -> ReplayResult<InitReport> {
        let _control = self.control.lock().await;

        let (event, index) = match self.load(event_id).await {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(error = %err, "initialize failed");
                self.inner
                    .lock()
                    .await
                    .log
                    .push(LogCategory::Error, err.to_string());
                return Err(err);
            }
        };

        let config = settings.resolve(index.total_records());
        let scheduler = ReleaseScheduler::new(Arc::new(index), config.clone());
        let report = init_report(&event, &scheduler);

        let mut inner = self.inner.lock().await;
        inner.install(event, settings, scheduler);
        inner.log.clear();
        log_run_header(&mut inner.log, &report, &config);
        if let Some(run) = inner.run.as_ref() {
            obs::emit_replay_initialized(
                event_id.as_str(),
                &run.run_id,
                report.total_records,
                report.skipped_records,
            );
        }

        Ok(report)
    }

    /// Zero progress and reshuffle the competitor order.
    ///
    /// With `event_id` the dataset is reloaded; the existing index is kept
    /// when the reload is the same event with an identical fingerprint.
    #[instrument(skip(self))]
    pub async fn reset(&self, event_id: Option<EventId>) -> ReplayResult<InitReport> {
        let _control = self.control.lock().await;

        let (current_event, current_fingerprint, settings) = {
            let inner = self.inner.lock().await;
            let run = inner
                .run
                .as_ref()
                .ok_or_else(|| ReplayError::invalid("reset", RunState::Uninitialized))?;
            (
                run.event.id.clone(),
                run.scheduler.index().fingerprint().to_string(),
                run.settings.clone(),
            )
        };

        let reload = match event_id {
            Some(id) => {
                let (event, index) = self.load(&id).await?;
                let unchanged = id == current_event && index.fingerprint() == current_fingerprint;
                (!unchanged).then_some((event, index))
            }
            None => None,
        };

        let mut inner = self.inner.lock().await;
        let report = match reload {
            Some((event, index)) => {
                let config = settings.resolve(index.total_records());
                let scheduler = ReleaseScheduler::new(Arc::new(index), config.clone());
                let report = init_report(&event, &scheduler);
                inner.install(event, settings, scheduler);
                inner.log.clear();
                log_run_header(&mut inner.log, &report, &config);
                report
            }
            None => {
                inner.disarm();
                inner.epoch += 1;
                inner.persisted = 0;
                inner.persist_failures = 0;
                let run = inner.run_mut("reset")?;
                run.scheduler.reset();
                run.run_id = uuid::Uuid::new_v4().to_string();
                init_report(&run.event, &run.scheduler)
            }
        };
        inner.log.push(LogCategory::Reset, "replay reset");
        obs::emit_state_changed(report.event_id.as_str(), "reset", "ready");

        Ok(report)
    }

    /// Start (or resume) timed release. Idempotent while running.
    #[instrument(skip(self))]
    pub async fn start(&self) -> ReplayResult<StartReport> {
        let _control = self.control.lock().await;
        let mut inner = self.inner.lock().await;

        let run = inner.run_mut("start")?;
        let outcome = run.scheduler.start()?;
        let interval = run.scheduler.config().interval;
        let event_id = run.event.id.clone();
        let report = StartReport {
            interval_ms: interval.as_millis() as u64,
            already_running: outcome == StartOutcome::AlreadyRunning,
        };

        match outcome {
            StartOutcome::AlreadyRunning => {
                debug!("start ignored, already running");
                return Ok(report);
            }
            StartOutcome::Resumed => {
                inner.log.push(LogCategory::Resume, "replay resumed");
            }
            StartOutcome::Started => {
                inner.log.push(LogCategory::Start, "replay started");
            }
        }
        if inner.ticker.is_none() {
            let run_id = inner.run.as_ref().map(|r| r.run_id.clone()).unwrap_or_default();
            self.arm(&mut inner, event_id.clone(), &run_id, interval);
        }
        obs::emit_state_changed(event_id.as_str(), "start", "running");

        Ok(report)
    }

    /// Alias of [`start`](Self::start).
    pub async fn resume(&self) -> ReplayResult<StartReport> {
        self.start().await
    }

    /// Toggle Running <-> Paused. The ticker stays armed while paused.
    #[instrument(skip(self))]
    pub async fn pause(&self) -> ReplayResult<PauseReport> {
        let _control = self.control.lock().await;
        let mut inner = self.inner.lock().await;

        let run = inner.run_mut("pause")?;
        let paused = run.scheduler.toggle_pause()?;
        let event_id = run.event.id.clone();

        if paused {
            inner.log.push(LogCategory::Pause, "replay paused");
            obs::emit_state_changed(event_id.as_str(), "pause", "paused");
        } else {
            inner.log.push(LogCategory::Resume, "replay resumed");
            obs::emit_state_changed(event_id.as_str(), "resume", "running");
        }
        Ok(PauseReport { paused })
    }

    /// Disarm the ticker and return to `Ready`, keeping progress.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> ReplayResult<StopReport> {
        let _control = self.control.lock().await;
        let mut inner = self.inner.lock().await;

        let run = inner.run_mut("stop")?;
        run.scheduler.stop()?;
        let progress = run.scheduler.progress();
        let report = StopReport {
            total_released: progress.total_released(),
            total_records: run.scheduler.index().total_records(),
        };
        let event_id = run.event.id.clone();

        inner.disarm();
        inner.log.push(
            LogCategory::Stop,
            format!(
                "replay stopped at {}/{}",
                report.total_released, report.total_records
            ),
        );
        obs::emit_state_changed(event_id.as_str(), "stop", "ready");
        Ok(report)
    }

    pub async fn status(&self) -> ReplayStatus {
        self.inner.lock().await.status()
    }

    /// Recent log entries, newest first.
    pub async fn log(&self) -> Vec<LogEntry> {
        self.inner.lock().await.log.snapshot()
    }

    /// Pull one batch on demand.
    ///
    /// Releases only while the run is `Ready`; a running or paused run is
    /// owned by the ticker and yields an empty batch. Pulled records are
    /// handed to the caller, not persisted.
    #[instrument(skip(self))]
    pub async fn drain_one_batch(&self) -> ReplayResult<BatchOutcome> {
        let mut inner = self.inner.lock().await;
        let run = inner.run_mut("drain")?;
        let event_id = run.event.id.clone();
        let outcome = run.scheduler.drain();
        inner.account(event_id.as_str(), &outcome);
        Ok(outcome)
    }

    /// Disarm the ticker and wait for an in-flight batch to finish persisting.
    pub async fn shutdown(&self) {
        let handle = {
            let _control = self.control.lock().await;
            self.inner.lock().await.disarm()
        };
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "ticker task failed");
                }
            }
        }
        METRICS.flush();
        info!("replay controller shut down");
    }

    async fn load(&self, event_id: &EventId) -> ReplayResult<(EventInfo, DatasetIndex)> {
        let event = self.repo.load_event(event_id).await?;
        let records = self.repo.load_records(event_id).await?;
        let index = DatasetIndex::build(records)
            .map_err(|_| ReplayError::EmptyDataset(event_id.to_string()))?;
        Ok((event, index))
    }

    fn arm(&self, inner: &mut Inner, event_id: EventId, run_id: &str, period: Duration) {
        inner.generation += 1;
        let generation = inner.generation;
        let (cancel, cancelled) = oneshot::channel();
        let span = obs::replay_span(event_id.as_str(), run_id);
        let handle = tokio::spawn(
            run_ticker(
                Arc::clone(&self.repo),
                Arc::clone(&self.inner),
                event_id,
                generation,
                period,
                cancelled,
            )
            .instrument(span),
        );
        inner.ticker = Some(Ticker {
            generation,
            cancel,
            handle,
        });
        debug!(generation, period_ms = period.as_millis() as u64, "ticker armed");
    }
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

async fn run_ticker<R: TimingRepository + 'static>(
    repo: Arc<R>,
    inner: Arc<Mutex<Inner>>,
    event_id: EventId,
    generation: u64,
    period: Duration,
    mut cancelled: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut cancelled => return,
            _ = interval.tick() => {}
        }

        let (epoch, records) = {
            let mut guard = inner.lock().await;
            if guard.generation != generation {
                return;
            }
            let Some(run) = guard.run.as_mut() else {
                return;
            };
            let outcome = run.scheduler.tick();
            guard.account(event_id.as_str(), &outcome);
            if outcome.completed {
                // Dropping our own ticker entry detaches this task.
                guard.ticker = None;
                guard.generation += 1;
                return;
            }
            (guard.epoch, outcome.records)
        };

        if !records.is_empty() {
            persist_batch(repo.as_ref(), &inner, &event_id, epoch, &records).await;
        }
    }
}

/// Persist every record of a batch. Failures are counted, never retried and
/// never roll back release progress.
async fn persist_batch<R: TimingRepository>(
    repo: &R,
    inner: &Mutex<Inner>,
    event_id: &EventId,
    epoch: u64,
    records: &[TimingRecord],
) {
    let mut saved = 0u64;
    let mut failures = Vec::new();
    for record in records {
        match repo.persist_record(event_id, record).await {
            Ok(()) => saved += 1,
            Err(err) => {
                obs::emit_persist_failed(
                    event_id.as_str(),
                    record.competitor.0,
                    record.stage.0,
                    &err,
                );
                METRICS.inc_persist_failures();
                failures.push(err.to_string());
            }
        }
    }

    let mut guard = inner.lock().await;
    if guard.epoch != epoch {
        debug!(saved, "persist results from a previous run discarded");
        return;
    }
    guard.persisted += saved;
    guard.persist_failures += failures.len() as u64;
    if saved > 0 {
        guard
            .log
            .push(LogCategory::Persist, format!("{saved} records saved"));
    }
    for failure in failures {
        guard.log.push(LogCategory::Error, failure);
    }
}
