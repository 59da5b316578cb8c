use crate::codec::{check_identifier, RecordSigner};
use crate::registry::BackendPlugin;
use crate::{reject, remediate, Dao, Result, WriteOutcome};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use vigil_common::config::NodeConfig;
use vigil_common::types::{FieldValue, Fields, StoredRecord, USER_SERIES};

pub const DEFAULT_SQLITE_FILE: &str = "vigil.db";

const RECORDS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    series TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    fields TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_records_series_time
    ON records(series, timestamp);
";

/// Local engine keeping every series in one SQLite table. Field maps are
/// stored as JSON, timestamps as epoch milliseconds.
pub struct SqliteDao {
    path: PathBuf,
    conn: Mutex<Connection>,
    signer: RecordSigner,
}

impl SqliteDao {
    pub fn open(path: &Path, signer: RecordSigner) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(RECORDS_SCHEMA)?;
        tracing::info!(path = %path.display(), "Opened SQLite store");
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
            signer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, series: &str, fields: &Fields) -> Result<()> {
        let fields_json = serde_json::to_string(fields)?;
        self.lock_conn().execute(
            "INSERT INTO records (series, timestamp, fields) VALUES (?1, ?2, ?3)",
            rusqlite::params![series, Utc::now().timestamp_millis(), fields_json],
        )?;
        Ok(())
    }

    fn query_records(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
        series: &str,
    ) -> Result<Vec<StoredRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |row| {
            let ts_ms: i64 = row.get(0)?;
            let fields_str: String = row.get(1)?;
            Ok((ts_ms, fields_str))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (timestamp_ms, fields_str) = row?;
            results.push(StoredRecord {
                op_type: series.to_string(),
                timestamp_ms,
                fields: serde_json::from_str(&fields_str)?,
            });
        }
        Ok(results)
    }

    fn latest_attribute(&self, name: &str) -> Result<Option<FieldValue>> {
        let path = format!("$.{name}");
        let fields_str: Option<String> = self
            .lock_conn()
            .query_row(
                "SELECT fields FROM records
                 WHERE series = ?1 AND json_extract(fields, ?2) IS NOT NULL
                 ORDER BY id DESC LIMIT 1",
                rusqlite::params![USER_SERIES, path],
                |row| row.get(0),
            )
            .optional()?;

        let Some(fields_str) = fields_str else {
            return Ok(None);
        };
        let mut fields: Fields = serde_json::from_str(&fields_str)?;
        Ok(fields.remove(name))
    }

    fn dump_series(&self, since_secs: i64) -> Result<BTreeMap<String, String>> {
        let series: Vec<String> = {
            let conn = self.lock_conn();
            let mut stmt = conn.prepare("SELECT DISTINCT series FROM records ORDER BY series")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };

        let since_ms = since_secs.saturating_mul(1000);
        let mut dumped = BTreeMap::new();
        for name in series {
            let records = self.query_records(
                "SELECT timestamp, fields FROM records
                 WHERE series = ?1 AND timestamp > ?2
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                &[&name, &since_ms],
                &name,
            )?;
            dumped.insert(name, serde_json::to_string(&records)?);
        }
        Ok(dumped)
    }

    /// Row count of a series, used by the contract tests.
    pub fn count(&self, series: &str) -> Result<u64> {
        let n: i64 = self.lock_conn().query_row(
            "SELECT COUNT(*) FROM records WHERE series = ?1",
            [series],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

impl Dao for SqliteDao {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn write_op(&self, op_type: &str, fields: Fields) -> Result<WriteOutcome> {
        if !self.validate_op(op_type) {
            return Ok(reject(self.name(), op_type, &fields));
        }
        let record = self.signer.seal(op_type, fields);
        tracing::debug!(op_type, "Saving operation");
        self.insert(&record.op_type, &record.fields)
            .map_err(|e| remediate(self, e))?;
        Ok(WriteOutcome::Written)
    }

    fn read_op(&self, op_type: &str, since_ms: i64, limit: usize) -> Result<Vec<StoredRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_records(
            "SELECT timestamp, fields FROM records
             WHERE series = ?1 AND timestamp >= ?2
             ORDER BY timestamp DESC, id DESC LIMIT ?3",
            &[&op_type, &since_ms, &limit],
            op_type,
        )
        .map_err(|e| remediate(self, e))
    }

    fn write_user_attribute(&self, name: &str, value: FieldValue) -> Result<()> {
        check_identifier(name)?;
        tracing::debug!(attribute = name, value = %value, "Saving user attribute");
        let mut fields = Fields::new();
        fields.insert(name.to_string(), value);
        self.insert(USER_SERIES, &fields)
            .map_err(|e| remediate(self, e))
    }

    fn read_user_attribute(&self, name: &str) -> Result<Option<FieldValue>> {
        check_identifier(name)?;
        self.latest_attribute(name)
            .map_err(|e| remediate(self, e))
    }

    fn dump(&self, since_secs: i64) -> Result<BTreeMap<String, String>> {
        self.dump_series(since_secs)
            .map_err(|e| remediate(self, e))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.lock_conn().execute_batch(RECORDS_SCHEMA)?;
        Ok(())
    }
}

pub struct SqlitePlugin;

impl SqlitePlugin {
    fn db_path(config: &NodeConfig) -> PathBuf {
        let file = config
            .get("sqlite_file")
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_SQLITE_FILE);
        config.install_dir().join(file)
    }
}

impl BackendPlugin for SqlitePlugin {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn create(&self, config: &NodeConfig) -> Result<Box<dyn Dao>> {
        let signer = RecordSigner::from_identity(&config.identity());
        Ok(Box::new(SqliteDao::open(&Self::db_path(config), signer)?))
    }

    fn remediate(&self, config: &NodeConfig) -> Result<()> {
        if let Some(parent) = Self::db_path(config).parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
