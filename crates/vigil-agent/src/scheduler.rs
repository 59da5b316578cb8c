//! Decides when the agent should refresh its schedule and dump its data.
//!
//! Nothing is kept in memory: every check re-reads the persisted
//! `last_updated` / `last_dumped` attributes through the DAO and compares them
//! with the current time, so checks can run at any cadence without drift.

use chrono::Utc;
use vigil_common::config::NodeConfig;
use vigil_common::types::FieldValue;
use vigil_storage::{Dao, Result};

/// Three days between schedule refreshes.
pub const UPDATE_PERIOD_SECS: i64 = 259_200;
/// One day between data dumps.
pub const DUMP_PERIOD_SECS: i64 = 86_400;

pub const LAST_UPDATED: &str = "last_updated";
pub const LAST_DUMPED: &str = "last_dumped";

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Whether a schedule refresh is due now. Always false unless `auto_update`
/// is `true`.
pub fn should_update(config: &NodeConfig, dao: &dyn Dao) -> Result<bool> {
    update_due_at(config, dao, now_secs())
}

pub fn update_due_at(config: &NodeConfig, dao: &dyn Dao, now: i64) -> Result<bool> {
    if !config.is_true("auto_update") {
        return Ok(false);
    }
    let last = last_updated(dao)?.unwrap_or(0);
    Ok(last < now - UPDATE_PERIOD_SECS)
}

/// Whether a data dump is due now.
pub fn should_dump(dao: &dyn Dao) -> Result<bool> {
    dump_due_at(dao, now_secs())
}

pub fn dump_due_at(dao: &dyn Dao, now: i64) -> Result<bool> {
    let last = last_dumped(dao)?.unwrap_or(0);
    Ok(last < now - DUMP_PERIOD_SECS)
}

/// Epoch seconds of the last successful refresh, `None` if never.
pub fn last_updated(dao: &dyn Dao) -> Result<Option<i64>> {
    read_timestamp(dao, LAST_UPDATED)
}

/// Epoch seconds of the last successful dump, `None` if never.
pub fn last_dumped(dao: &dyn Dao) -> Result<Option<i64>> {
    read_timestamp(dao, LAST_DUMPED)
}

/// Stores the current time as `last_updated`. Call only after a refresh
/// actually succeeded.
pub fn record_updated(dao: &dyn Dao) -> Result<i64> {
    record(dao, LAST_UPDATED)
}

/// Stores the current time as `last_dumped`. Call only after a dump was
/// actually delivered.
pub fn record_dumped(dao: &dyn Dao) -> Result<i64> {
    record(dao, LAST_DUMPED)
}

fn record(dao: &dyn Dao, attribute: &str) -> Result<i64> {
    let now = now_secs();
    dao.write_user_attribute(attribute, FieldValue::Int(now))?;
    tracing::info!(attribute, timestamp = now, "Recorded cycle completion");
    Ok(now)
}

fn read_timestamp(dao: &dyn Dao, attribute: &str) -> Result<Option<i64>> {
    let Some(value) = dao.read_user_attribute(attribute)? else {
        return Ok(None);
    };
    match value.as_i64() {
        Some(ts) => Ok(Some(ts)),
        None => {
            tracing::warn!(attribute, value = %value, "Stored timestamp is not a number, treating as never set");
            Ok(None)
        }
    }
}
