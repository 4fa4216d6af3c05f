//! Feed rendering for pull-style consumers.

use serde::Serialize;
use timing_store::{CompetitorId, StageId, TimingRecord};

/// Render a stage time as `m'ss.hh`, e.g. `125.5` -> `2'05.50`.
///
/// Zero, negative and non-finite times have nothing to show and yield `None`.
pub fn format_stage_time(secs: f64) -> Option<String> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    let hundredths = (secs * 100.0).round() as u64;
    let minutes = hundredths / 6000;
    let rest = hundredths % 6000;
    Some(format!("{}'{:02}.{:02}", minutes, rest / 100, rest % 100))
}

/// One line of a released-results feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationRow {
    pub number: CompetitorId,
    pub time: Option<String>,
    pub surname: String,
    pub name: String,
    pub class: String,
    pub vehicle: String,
    pub penalty_secs: f64,
    pub stage: StageId,
}

impl From<&TimingRecord> for ClassificationRow {
    fn from(record: &TimingRecord) -> Self {
        let driver = record.driver.clone().unwrap_or_default();
        Self {
            number: record.competitor,
            time: format_stage_time(record.elapsed_secs),
            surname: driver.surname,
            name: driver.name,
            class: driver.class.unwrap_or_default(),
            vehicle: driver.vehicle.unwrap_or_default(),
            penalty_secs: record.penalty_secs,
            stage: record.stage,
        }
    }
}

/// Feed rows for a batch, in release order.
pub fn classification_rows(records: &[TimingRecord]) -> Vec<ClassificationRow> {
    records.iter().map(ClassificationRow::from).collect()
}
