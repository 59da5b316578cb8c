//! Storage abstraction for operation records and node attributes.
//!
//! Every engine implements [`Dao`]. The engine is picked at startup from the
//! `database` config key through the [`registry::BackendRegistry`]:
//! [`null::NullDao`] discards everything, [`sqlite::SqliteDao`] keeps records
//! in a local SQLite file, and [`influx::InfluxDao`] talks to an InfluxDB 0.8
//! server over HTTP.

pub mod codec;
pub mod error;
pub mod influx;
pub mod null;
pub mod registry;
pub mod sqlite;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use vigil_common::types::{FieldValue, Fields, StoredRecord, OP_TYPES};

pub use error::{Result, StorageError};
pub use registry::{BackendPlugin, BackendRegistry};

/// What happened to a `write_op` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The `op_type` is not recognized by the engine; nothing was sent.
    Rejected,
}

/// Persistence contract shared by all storage engines.
///
/// A DAO owns its backend connection. Implementations serialize access
/// internally, so one instance may be shared, but the agent drives it from a
/// single caller at a time.
pub trait Dao: Send + Sync {
    /// Engine name as used in the `database` config key.
    fn name(&self) -> &str;

    /// Operation types this engine accepts.
    fn valid_op_types(&self) -> &[&str] {
        OP_TYPES
    }

    fn validate_op(&self, op_type: &str) -> bool {
        self.valid_op_types().contains(&op_type)
    }

    /// Signs and persists one operation record.
    ///
    /// An unrecognized `op_type` is logged and yields
    /// [`WriteOutcome::Rejected`] without touching the backend.
    fn write_op(&self, op_type: &str, fields: Fields) -> Result<WriteOutcome>;

    /// Most recent records of a type with a timestamp at or after
    /// `since_ms`, newest first, at most `limit`. Empty when none exist.
    fn read_op(&self, op_type: &str, since_ms: i64, limit: usize) -> Result<Vec<StoredRecord>>;

    /// Appends a value for a node attribute. Earlier values stay in the
    /// backend; reads only see the latest.
    fn write_user_attribute(&self, name: &str, value: FieldValue) -> Result<()>;

    /// Latest value written for the attribute, `None` if it was never set.
    fn read_user_attribute(&self, name: &str) -> Result<Option<FieldValue>>;

    /// Per series, at most one record newer than `since_secs`, serialized
    /// as JSON.
    fn dump(&self, since_secs: i64) -> Result<BTreeMap<String, String>>;

    /// Creates the database/schema if it is missing. Used as the one
    /// remediation attempt after a failed write.
    fn ensure_schema(&self) -> Result<()>;
}

/// Logs a failed backend call, attempts [`Dao::ensure_schema`] once and hands
/// the original error back for the caller to propagate.
pub(crate) fn remediate<D: Dao + ?Sized>(dao: &D, err: StorageError) -> StorageError {
    tracing::error!(backend = dao.name(), error = %err, "Storage call failed, ensuring schema");
    if let Err(e) = dao.ensure_schema() {
        tracing::error!(backend = dao.name(), error = %e, "Schema remediation failed");
    }
    err
}

/// Warning shared by every engine for a rejected `write_op`.
pub(crate) fn reject(backend: &str, op_type: &str, fields: &Fields) -> WriteOutcome {
    tracing::warn!(
        backend,
        op_type,
        fields = %codec::canonical(fields),
        "Operation type not valid, record dropped"
    );
    WriteOutcome::Rejected
}
