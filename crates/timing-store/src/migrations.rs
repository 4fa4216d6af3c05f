//! SurrealDB schema migrations and initialization
//!
//! Sets up the three stage replay tables with their indexes.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all stage replay tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing stage replay SurrealDB schema");

    init_events_table(db).await?;
    init_timings_table(db).await?;
    init_released_timings_table(db).await?;

    info!("Stage replay schema initialization complete");
    Ok(())
}

/// Initialize `events` table
///
/// Schema:
/// ```text
/// TABLE events {
///   event_id:  STRING (unique)
///   name:      STRING
/// }
/// ```
async fn init_events_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing events table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS events SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_event_id ON TABLE events COLUMNS event_id UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}

/// Initialize `timings` table (source dataset)
///
/// Schema:
/// ```text
/// TABLE timings {
///   event_id:      STRING (indexed)
///   competitor:    INT
///   stage:         INT
///   elapsed_secs:  FLOAT
///   penalty_secs:  FLOAT
///   surname, name, class, vehicle: STRING?
/// }
/// ```
///
/// `(event_id, competitor, stage)` is unique: one result per competitor and stage.
async fn init_timings_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing timings table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS timings SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_timing_identity ON TABLE timings
            COLUMNS event_id, competitor, stage UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_timing_event ON TABLE timings COLUMNS event_id;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}

/// Initialize `released_timings` table
///
/// Same columns as `timings` plus `released_at: DATETIME`. Rows are keyed by
/// `"{event}_{competitor}_{stage}"` so re-persisting a pair is an overwrite.
async fn init_released_timings_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing released_timings table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS released_timings SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_released_event ON TABLE released_timings COLUMNS event_id;
        DEFINE INDEX IF NOT EXISTS idx_released_event_stage ON TABLE released_timings
            COLUMNS event_id, stage;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}
