use crate::registry::BackendPlugin;
use crate::{reject, Dao, Result, WriteOutcome};
use std::collections::BTreeMap;
use vigil_common::config::NodeConfig;
use vigil_common::types::{FieldValue, Fields, StoredRecord};

/// Engine that accepts every valid write and stores nothing.
///
/// Attributes always read back as never set, so with this engine the agent
/// considers every update and dump due.
#[derive(Debug, Default)]
pub struct NullDao;

impl Dao for NullDao {
    fn name(&self) -> &str {
        "null"
    }

    fn write_op(&self, op_type: &str, fields: Fields) -> Result<WriteOutcome> {
        if !self.validate_op(op_type) {
            return Ok(reject(self.name(), op_type, &fields));
        }
        tracing::debug!(op_type, "Null backend discarded record");
        Ok(WriteOutcome::Written)
    }

    fn read_op(&self, _op_type: &str, _since_ms: i64, _limit: usize) -> Result<Vec<StoredRecord>> {
        Ok(Vec::new())
    }

    fn write_user_attribute(&self, name: &str, value: FieldValue) -> Result<()> {
        tracing::debug!(attribute = name, value = %value, "Null backend discarded attribute");
        Ok(())
    }

    fn read_user_attribute(&self, _name: &str) -> Result<Option<FieldValue>> {
        Ok(None)
    }

    fn dump(&self, _since_secs: i64) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }

    fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }
}

pub struct NullPlugin;

impl BackendPlugin for NullPlugin {
    fn name(&self) -> &str {
        "null"
    }

    fn create(&self, _config: &NodeConfig) -> Result<Box<dyn Dao>> {
        Ok(Box::new(NullDao))
    }
}
