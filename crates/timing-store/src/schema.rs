//! Row types for the stage replay SurrealDB tables
//!
//! Tables:
//! - events: Event metadata
//! - timings: Source timing records, one row per (event, competitor, stage)
//! - released_timings: Records already released by a replay (upsert target)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{
    CompetitorId, DriverInfo, EventId, EventInfo, StageId, TimingRecord,
};

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: String,
    pub name: String,
}

impl From<&EventInfo> for EventRow {
    fn from(info: &EventInfo) -> Self {
        EventRow {
            event_id: info.id.0.clone(),
            name: info.name.clone(),
        }
    }
}

impl EventRow {
    pub fn into_info(self) -> EventInfo {
        EventInfo {
            id: EventId(self.event_id),
            name: self.name,
        }
    }
}

/// Timing row, shared by `timings` and `released_timings`.
///
/// Driver details are spread over optional columns; `released_at` is only set
/// on released rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingRow {
    pub event_id: String,
    pub competitor: u32,
    pub stage: u32,
    pub elapsed_secs: f64,
    pub penalty_secs: f64,
    pub surname: Option<String>,
    pub name: Option<String>,
    pub class: Option<String>,
    pub vehicle: Option<String>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub released_at: Option<DateTime<Utc>>,
}

impl TimingRow {
    pub fn new(event_id: &EventId, record: &TimingRecord) -> Self {
        let driver = record.driver.as_ref();
        TimingRow {
            event_id: event_id.0.clone(),
            competitor: record.competitor.0,
            stage: record.stage.0,
            elapsed_secs: record.elapsed_secs,
            penalty_secs: record.penalty_secs,
            surname: driver.map(|d| d.surname.clone()),
            name: driver.map(|d| d.name.clone()),
            class: driver.and_then(|d| d.class.clone()),
            vehicle: driver.and_then(|d| d.vehicle.clone()),
            released_at: None,
        }
    }

    /// Row for `released_timings`, stamped with the current time.
    pub fn released(event_id: &EventId, record: &TimingRecord) -> Self {
        TimingRow {
            released_at: Some(Utc::now()),
            ..Self::new(event_id, record)
        }
    }

    pub fn into_record(self) -> TimingRecord {
        let driver = match (self.surname, self.name) {
            (None, None) => None,
            (surname, name) => Some(DriverInfo {
                surname: surname.unwrap_or_default(),
                name: name.unwrap_or_default(),
                class: self.class,
                vehicle: self.vehicle,
            }),
        };
        TimingRecord {
            competitor: CompetitorId(self.competitor),
            stage: StageId(self.stage),
            elapsed_secs: self.elapsed_secs,
            penalty_secs: self.penalty_secs,
            driver,
        }
    }
}

/// Deterministic `released_timings` key, so persisting the same
/// `(event, competitor, stage)` again overwrites the previous row.
pub fn released_key(event_id: &EventId, record: &TimingRecord) -> String {
    format!("{}_{}_{}", event_id.0, record.competitor.0, record.stage.0)
}
