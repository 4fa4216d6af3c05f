//! In-memory fake for the storage trait (testing only)
//!
//! Provides `MemoryTimingRepository`, which satisfies the `TimingRepository`
//! contract without any external dependencies and can be told to fail
//! persistence for chosen competitors.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::storage_traits::*;

type ReleasedKey = (String, StageId, CompetitorId);

/// In-memory repository backed by a `HashMap<event_id, dataset>` for sources
/// and a `BTreeMap` for released records.
#[derive(Debug, Default)]
pub struct MemoryTimingRepository {
    events: Mutex<HashMap<String, EventDataset>>,
    released: Mutex<BTreeMap<ReleasedKey, TimingRecord>>,
    failing: Mutex<HashSet<CompetitorId>>,
    persist_attempts: AtomicU64,
}

impl MemoryTimingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-loaded with one event.
    pub fn with_event(dataset: EventDataset) -> Self {
        let repo = Self::new();
        repo.insert_event(dataset);
        repo
    }

    /// Register (or replace) an event and its source records.
    pub fn insert_event(&self, dataset: EventDataset) {
        let mut events = self.events.lock().unwrap();
        events.insert(dataset.event.id.0.clone(), dataset);
    }

    /// Make every `persist_record` call for `competitor` fail.
    pub fn fail_persist_for(&self, competitor: CompetitorId) {
        self.failing.lock().unwrap().insert(competitor);
    }

    /// Stop injecting persistence failures.
    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Number of `persist_record` calls seen, successful or not.
    pub fn persist_attempts(&self) -> u64 {
        self.persist_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimingRepository for MemoryTimingRepository {
    async fn load_event(&self, event_id: &EventId) -> StoreResult<EventInfo> {
        let events = self.events.lock().unwrap();
        events
            .get(event_id.as_str())
            .map(|d| d.event.clone())
            .ok_or_else(|| StoreError::NotFound {
                event_id: event_id.0.clone(),
            })
    }

    async fn load_records(&self, event_id: &EventId) -> StoreResult<Vec<TimingRecord>> {
        let events = self.events.lock().unwrap();
        let dataset = events
            .get(event_id.as_str())
            .ok_or_else(|| StoreError::NotFound {
                event_id: event_id.0.clone(),
            })?;
        if dataset.records.is_empty() {
            return Err(StoreError::EmptyDataset {
                event_id: event_id.0.clone(),
            });
        }
        Ok(dataset.records.clone())
    }

    async fn persist_record(&self, event_id: &EventId, record: &TimingRecord) -> StoreResult<()> {
        self.persist_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&record.competitor) {
            return Err(StoreError::Persist {
                competitor: record.competitor.0,
                stage: record.stage.0,
                reason: "injected failure".to_string(),
            });
        }
        let mut released = self.released.lock().unwrap();
        released.insert(
            (event_id.0.clone(), record.stage, record.competitor),
            record.clone(),
        );
        Ok(())
    }

    async fn released_records(&self, event_id: &EventId) -> StoreResult<Vec<TimingRecord>> {
        let released = self.released.lock().unwrap();
        Ok(released
            .iter()
            .filter(|((event, _, _), _)| event == event_id.as_str())
            .map(|(_, record)| record.clone())
            .collect())
    }
}
