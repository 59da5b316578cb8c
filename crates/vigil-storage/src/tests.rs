use crate::codec::{verify, RecordSigner};
use crate::null::NullDao;
use crate::sqlite::SqliteDao;
use crate::{BackendRegistry, Dao, StorageError, WriteOutcome};
use std::path::Path;
use tempfile::TempDir;
use vigil_common::config::NodeConfig;
use vigil_common::types::{FieldValue, Fields, OperationRecord, StoredRecord, USER_SERIES};

const SECRET: &str = "8d2f0a3c-node-secret";

fn setup() -> (TempDir, SqliteDao) {
    let dir = TempDir::new().unwrap();
    let dao = SqliteDao::open(
        &dir.path().join("vigil.db"),
        RecordSigner::new(SECRET, "2.1.0"),
    )
    .unwrap();
    (dir, dao)
}

fn ping(landmark: &str, avg: f64) -> Fields {
    OperationRecord::new("ping")
        .with("landmark", landmark)
        .with("avg", avg)
        .fields
}

#[test]
fn write_and_read_op() {
    let (_dir, dao) = setup();

    assert_eq!(
        dao.write_op("ping", ping("a.example", 10.0)).unwrap(),
        WriteOutcome::Written
    );
    assert_eq!(
        dao.write_op("ping", ping("b.example", 20.0)).unwrap(),
        WriteOutcome::Written
    );

    let records = dao.read_op("ping", 0, 100).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].fields["landmark"], FieldValue::from("b.example"));
    assert!(records[0].timestamp_ms >= records[1].timestamp_ms);

    let latest = dao.read_op("ping", 0, 1).unwrap();
    assert_eq!(latest.len(), 1);
}

#[test]
fn read_op_of_unknown_type_is_empty() {
    let (_dir, dao) = setup();
    assert!(dao.read_op("dns", 0, 10).unwrap().is_empty());
}

#[test]
fn read_op_respects_since() {
    let (_dir, dao) = setup();
    dao.write_op("ping", ping("a.example", 1.0)).unwrap();
    let future = chrono::Utc::now().timestamp_millis() + 60_000;
    assert!(dao.read_op("ping", future, 10).unwrap().is_empty());
}

#[test]
fn written_ops_are_versioned_and_signed() {
    let (_dir, dao) = setup();
    dao.write_op("httping", ping("c.example", 3.5)).unwrap();

    let record = &dao.read_op("httping", 0, 1).unwrap()[0];
    assert_eq!(record.fields["version"], FieldValue::from("2.1.0"));
    assert!(verify(SECRET, &record.fields));
}

#[test]
fn invalid_op_type_writes_nothing() {
    let (_dir, dao) = setup();

    let outcome = dao.write_op("teleport", ping("a.example", 1.0)).unwrap();
    assert_eq!(outcome, WriteOutcome::Rejected);
    assert_eq!(dao.count("teleport").unwrap(), 0);

    // The attribute series is reserved.
    let outcome = dao.write_op(USER_SERIES, ping("a.example", 1.0)).unwrap();
    assert_eq!(outcome, WriteOutcome::Rejected);
    assert_eq!(dao.count(USER_SERIES).unwrap(), 0);
}

#[test]
fn user_attribute_roundtrip() {
    let (_dir, dao) = setup();
    let values = [
        FieldValue::Int(1_700_000_000),
        FieldValue::Float(2.5),
        FieldValue::from("eu-north"),
        FieldValue::Bool(true),
    ];
    for value in values {
        dao.write_user_attribute("x", value.clone()).unwrap();
        assert_eq!(dao.read_user_attribute("x").unwrap(), Some(value));
    }
}

#[test]
fn user_attribute_last_write_wins() {
    let (_dir, dao) = setup();
    dao.write_user_attribute("last_updated", FieldValue::Int(100)).unwrap();
    dao.write_user_attribute("last_dumped", FieldValue::Int(50)).unwrap();
    dao.write_user_attribute("last_updated", FieldValue::Int(200)).unwrap();

    assert_eq!(
        dao.read_user_attribute("last_updated").unwrap(),
        Some(FieldValue::Int(200))
    );
    assert_eq!(
        dao.read_user_attribute("last_dumped").unwrap(),
        Some(FieldValue::Int(50))
    );
    // Earlier values are kept in the backend.
    assert_eq!(dao.count(USER_SERIES).unwrap(), 3);
}

#[test]
fn unset_user_attribute_is_none() {
    let (_dir, dao) = setup();
    assert_eq!(dao.read_user_attribute("last_dumped").unwrap(), None);
    dao.write_user_attribute("other", FieldValue::Int(1)).unwrap();
    assert_eq!(dao.read_user_attribute("last_dumped").unwrap(), None);
}

#[test]
fn attribute_names_are_validated() {
    let (_dir, dao) = setup();
    let err = dao
        .write_user_attribute("x') --", FieldValue::Int(1))
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidIdentifier(_)));
    assert!(dao.read_user_attribute("a.b").is_err());
}

#[test]
fn dump_returns_one_record_per_series() {
    let (_dir, dao) = setup();
    dao.write_op("ping", ping("a.example", 1.0)).unwrap();
    dao.write_op("ping", ping("b.example", 2.0)).unwrap();
    dao.write_op("dns", OperationRecord::new("dns").with("query", "example.org").fields)
        .unwrap();
    dao.write_user_attribute("last_updated", FieldValue::Int(1)).unwrap();

    let dumped = dao.dump(0).unwrap();
    assert_eq!(
        dumped.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["dns", "ping", "user"]
    );
    let pings: Vec<StoredRecord> = serde_json::from_str(&dumped["ping"]).unwrap();
    assert_eq!(pings.len(), 1);
    assert_eq!(pings[0].fields["landmark"], FieldValue::from("b.example"));

    let future = chrono::Utc::now().timestamp() + 3600;
    let later = dao.dump(future).unwrap();
    assert_eq!(later["ping"], "[]");
}

#[test]
fn ensure_schema_recreates_dropped_table() {
    let (dir, dao) = setup();
    {
        let conn = rusqlite::Connection::open(dir.path().join("vigil.db")).unwrap();
        conn.execute_batch("DROP TABLE records;").unwrap();
    }
    // The write fails, remediation recreates the table, the next write works.
    assert!(dao.write_op("ping", ping("a.example", 1.0)).is_err());
    assert_eq!(
        dao.write_op("ping", ping("a.example", 1.0)).unwrap(),
        WriteOutcome::Written
    );
}

#[test]
fn failed_reads_recreate_dropped_table() {
    let (dir, dao) = setup();
    dao.write_user_attribute("last_updated", FieldValue::Int(9)).unwrap();
    {
        let conn = rusqlite::Connection::open(dir.path().join("vigil.db")).unwrap();
        conn.execute_batch("DROP TABLE records;").unwrap();
    }

    let err = dao.read_user_attribute("last_updated").unwrap_err();
    assert!(matches!(err, StorageError::Sqlite(_)));
    assert_eq!(dao.read_user_attribute("last_updated").unwrap(), None);

    let (dir, dao) = setup();
    {
        let conn = rusqlite::Connection::open(dir.path().join("vigil.db")).unwrap();
        conn.execute_batch("DROP TABLE records;").unwrap();
    }
    assert!(dao.dump(0).is_err());
    assert!(dao.dump(0).unwrap().is_empty());
    assert!(dao.read_op("ping", 0, 10).unwrap().is_empty());
}

#[test]
fn invalid_identifier_read_is_not_remediated() {
    let (dir, dao) = setup();
    {
        let conn = rusqlite::Connection::open(dir.path().join("vigil.db")).unwrap();
        conn.execute_batch("DROP TABLE records;").unwrap();
    }
    // Rejected before touching the backend, so the table stays missing.
    assert!(matches!(
        dao.read_user_attribute("a.b"),
        Err(StorageError::InvalidIdentifier(_))
    ));
    assert!(dao.read_user_attribute("last_updated").is_err());
}

#[test]
fn null_backend_discards_everything() {
    let dao = NullDao;
    assert_eq!(
        dao.write_op("ping", ping("a.example", 1.0)).unwrap(),
        WriteOutcome::Written
    );
    assert_eq!(
        dao.write_op("teleport", Fields::new()).unwrap(),
        WriteOutcome::Rejected
    );
    dao.write_user_attribute("last_updated", FieldValue::Int(5)).unwrap();
    assert_eq!(dao.read_user_attribute("last_updated").unwrap(), None);
    assert!(dao.read_op("ping", 0, 10).unwrap().is_empty());
    assert!(dao.dump(0).unwrap().is_empty());
}

#[test]
fn registry_opens_sqlite_in_install_dir() {
    let dir = TempDir::new().unwrap();
    let config = NodeConfig::parse(
        "database=sqlite\nsecret=abc\nsqlite_file=node.db\n",
        dir.path(),
        &dir.path().join("vigil.conf"),
        "1.0",
    );
    let dao = BackendRegistry::default().open(&config).unwrap();
    assert_eq!(dao.name(), "sqlite");
    dao.write_user_attribute("last_dumped", FieldValue::Int(7)).unwrap();
    assert!(Path::new(&dir.path().join("node.db")).exists());
}
