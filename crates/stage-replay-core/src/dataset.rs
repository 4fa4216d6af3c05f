//! Read-only dataset index for one event.
//!
//! Groups the flat list of timing records by competitor and by stage, assigns
//! dense stage positions (0..N-1, ascending stage id) and computes per-stage
//! totals. Built once per replay and shared via `Arc`; never mutated.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use sha2::{Digest, Sha256};
use timing_store::{CompetitorId, StageId, TimingRecord};
use tracing::{debug, warn};

/// Build failure: the dataset contained no records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("dataset has no timing records")]
pub struct EmptyDatasetError;

/// One ordered leg of the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub id: StageId,
    /// Dense 0-based sequence position
    pub position: usize,
    /// Number of releasable records for this stage
    pub total: usize,
}

/// One participant and its records, indexed by stage position.
#[derive(Debug, Clone)]
pub struct Competitor {
    pub id: CompetitorId,
    records: Vec<Option<TimingRecord>>,
}

impl Competitor {
    /// The record for stage `position`, if the competitor completed it.
    pub fn record(&self, position: usize) -> Option<&TimingRecord> {
        self.records.get(position).and_then(Option::as_ref)
    }

    /// Number of stages this competitor has a record for.
    pub fn stages_completed(&self) -> usize {
        self.records.iter().filter(|r| r.is_some()).count()
    }
}

/// In-memory projection of an event's timing records.
#[derive(Debug, Clone)]
pub struct DatasetIndex {
    stages: Vec<Stage>,
    /// Sorted by ascending competitor id (natural order)
    competitors: Vec<Competitor>,
    total_records: usize,
    skipped_records: usize,
    fingerprint: String,
}

impl DatasetIndex {
    /// Build the index from a flat record list.
    ///
    /// A competitor can only be released one stage after another, so a record
    /// that follows a gap in that competitor's stages could never be released.
    /// Such records, and duplicate `(competitor, stage)` pairs after the
    /// first, are dropped and counted in [`skipped_records`](Self::skipped_records).
    pub fn build(records: Vec<TimingRecord>) -> Result<Self, EmptyDatasetError> {
        if records.is_empty() {
            return Err(EmptyDatasetError);
        }

        let stage_ids: BTreeSet<StageId> = records.iter().map(|r| r.stage).collect();
        let position: HashMap<StageId, usize> = stage_ids
            .iter()
            .enumerate()
            .map(|(pos, id)| (*id, pos))
            .collect();
        let all_stages = stage_ids.len();

        let mut skipped = 0usize;
        let mut grouped: BTreeMap<CompetitorId, Vec<Option<TimingRecord>>> = BTreeMap::new();
        for record in records {
            let slots = grouped
                .entry(record.competitor)
                .or_insert_with(|| vec![None; all_stages]);
            let slot = &mut slots[position[&record.stage]];
            if slot.is_some() {
                warn!(
                    competitor = %record.competitor,
                    stage = %record.stage,
                    "duplicate timing record dropped"
                );
                skipped += 1;
                continue;
            }
            *slot = Some(record);
        }

        let mut competitors = Vec::with_capacity(grouped.len());
        let mut stage_count = 0usize;
        for (id, mut slots) in grouped {
            let reachable = slots.iter().take_while(|r| r.is_some()).count();
            let unreachable = slots[reachable..].iter().filter(|r| r.is_some()).count();
            if unreachable > 0 {
                warn!(
                    competitor = %id,
                    unreachable,
                    "records after a missing stage can never be released; dropped"
                );
                skipped += unreachable;
            }
            slots.truncate(reachable);
            if reachable == 0 {
                continue;
            }
            stage_count = stage_count.max(reachable);
            competitors.push(Competitor { id, records: slots });
        }

        let stages: Vec<Stage> = stage_ids
            .into_iter()
            .take(stage_count)
            .enumerate()
            .map(|(pos, id)| Stage {
                id,
                position: pos,
                total: competitors
                    .iter()
                    .filter(|c| c.record(pos).is_some())
                    .count(),
            })
            .collect();
        let total_records = stages.iter().map(|s| s.total).sum();
        let fingerprint = fingerprint(&competitors);

        debug!(
            stages = stages.len(),
            competitors = competitors.len(),
            total_records,
            skipped,
            "dataset index built"
        );

        Ok(Self {
            stages,
            competitors,
            total_records,
            skipped_records: skipped,
            fingerprint,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, position: usize) -> Option<&Stage> {
        self.stages.get(position)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Releasable records for stage `position` (0 for unknown positions).
    pub fn total_for(&self, position: usize) -> usize {
        self.stages.get(position).map_or(0, |s| s.total)
    }

    /// Competitors in natural (ascending id) order.
    pub fn competitors(&self) -> &[Competitor] {
        &self.competitors
    }

    pub fn competitor(&self, index: usize) -> Option<&Competitor> {
        self.competitors.get(index)
    }

    pub fn competitor_count(&self) -> usize {
        self.competitors.len()
    }

    pub fn total_records(&self) -> usize {
        self.total_records
    }

    /// Records dropped at build time (duplicates and unreachable records).
    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    /// SHA-256 (hex) over the indexed records; equal datasets hash equal.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn fingerprint(competitors: &[Competitor]) -> String {
    let mut hasher = Sha256::new();
    for competitor in competitors {
        for record in competitor.records.iter().flatten() {
            hasher.update(record.competitor.0.to_le_bytes());
            hasher.update(record.stage.0.to_le_bytes());
            hasher.update(record.elapsed_secs.to_bits().to_le_bytes());
            hasher.update(record.penalty_secs.to_bits().to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}
