use crate::codec::{check_identifier, encode_series, RecordSigner};
use crate::registry::BackendPlugin;
use crate::{reject, remediate, Dao, Result, StorageError, WriteOutcome};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use vigil_common::config::NodeConfig;
use vigil_common::types::{FieldValue, Fields, StoredRecord, USER_SERIES};

pub const DEFAULT_INFLUX_HOST: &str = "localhost";
pub const DEFAULT_INFLUX_PORT: u16 = 8086;
pub const DEFAULT_INFLUX_DATABASE: &str = "vigil";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Connection settings, read from the `influx_*` config keys.
#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub timeout: Duration,
}

impl InfluxSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        let non_empty = |key: &str| config.get(key).filter(|v| !v.is_empty());
        let base_url = match non_empty("influx_url") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "http://{}:{}",
                non_empty("influx_host").unwrap_or(DEFAULT_INFLUX_HOST),
                config
                    .get_parsed::<u16>("influx_port")
                    .unwrap_or(DEFAULT_INFLUX_PORT)
            ),
        };
        Self {
            base_url,
            username: non_empty("influx_username").unwrap_or("root").to_string(),
            password: non_empty("influx_password").unwrap_or("root").to_string(),
            database: non_empty("influx_database")
                .unwrap_or(DEFAULT_INFLUX_DATABASE)
                .to_string(),
            timeout: Duration::from_secs(
                config
                    .get_parsed("http_timeout_secs")
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
        }
    }

    fn series_url(&self) -> String {
        format!("{}/db/{}/series", self.base_url, self.database)
    }

    fn credentials(&self) -> [(&str, &str); 2] {
        [("u", self.username.as_str()), ("p", self.password.as_str())]
    }

    fn client(&self) -> Result<Client> {
        Ok(Client::builder().timeout(self.timeout).build()?)
    }
}

/// One series in an InfluxDB 0.8 query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesResult {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub points: Vec<Vec<Value>>,
}

impl SeriesResult {
    /// Converts points into records. `time` becomes the timestamp,
    /// `sequence_number` and null columns are dropped.
    pub fn records(&self) -> Vec<StoredRecord> {
        self.points
            .iter()
            .map(|point| {
                let mut fields = Fields::new();
                let mut timestamp_ms = 0;
                for (column, value) in self.columns.iter().zip(point) {
                    match column.as_str() {
                        "time" => {
                            timestamp_ms = value
                                .as_i64()
                                .or_else(|| value.as_f64().map(|f| f as i64))
                                .unwrap_or_default();
                        }
                        "sequence_number" => {}
                        _ => {
                            if let Some(v) = FieldValue::from_json(value) {
                                fields.insert(column.clone(), v);
                            }
                        }
                    }
                }
                StoredRecord {
                    op_type: self.name.clone(),
                    timestamp_ms,
                    fields,
                }
            })
            .collect()
    }
}

/// Engine backed by an InfluxDB 0.8 server.
pub struct InfluxDao {
    client: Client,
    settings: InfluxSettings,
    signer: RecordSigner,
}

impl InfluxDao {
    /// Builds the client and checks the server answers `/ping`.
    pub fn connect(settings: InfluxSettings, signer: RecordSigner) -> Result<Self> {
        tracing::info!(
            url = %settings.base_url,
            database = %settings.database,
            username = %settings.username,
            "Connecting to InfluxDB"
        );
        let client = settings.client()?;
        let unavailable = |reason: String| StorageError::Unavailable {
            backend: "influx".to_string(),
            reason,
        };
        let resp = client
            .get(format!("{}/ping", settings.base_url))
            .send()
            .map_err(|e| unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(unavailable(format!("ping returned {}", resp.status())));
        }
        Ok(Self {
            client,
            settings,
            signer,
        })
    }

    fn write_points(&self, body: &Value) -> Result<()> {
        let resp = self
            .client
            .post(self.settings.series_url())
            .query(&self.settings.credentials())
            .json(body)
            .send()?;
        check_status(resp)?;
        Ok(())
    }

    /// Runs a query. A missing series is an empty result, not an error.
    pub fn query(&self, q: &str) -> Result<Vec<SeriesResult>> {
        let [u, p] = self.settings.credentials();
        let resp = self
            .client
            .get(self.settings.series_url())
            .query(&[u, p, ("q", q)])
            .send()?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json()?);
        }
        let body = resp.text().unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("Couldn't find series") {
            return Ok(Vec::new());
        }
        Err(StorageError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn list_series(&self) -> Result<Vec<String>> {
        let results = self.query("list series")?;
        let mut names = Vec::new();
        for result in &results {
            let idx = result
                .columns
                .iter()
                .position(|c| c == "name")
                .unwrap_or(1);
            for point in &result.points {
                match point.get(idx).and_then(Value::as_str) {
                    Some(name) => names.push(name.to_string()),
                    None => {
                        return Err(StorageError::Malformed(format!(
                            "series list point without name: {point:?}"
                        )))
                    }
                }
            }
        }
        Ok(names)
    }
}

impl Dao for InfluxDao {
    fn name(&self) -> &str {
        "influx"
    }

    fn write_op(&self, op_type: &str, fields: Fields) -> Result<WriteOutcome> {
        if !self.validate_op(op_type) {
            return Ok(reject(self.name(), op_type, &fields));
        }
        let record = self.signer.seal(op_type, fields);
        let body = encode_series(&record.op_type, &record.fields);
        tracing::debug!(op_type, body = %body, "Saving operation");
        self.write_points(&body).map_err(|e| remediate(self, e))?;
        Ok(WriteOutcome::Written)
    }

    fn read_op(&self, op_type: &str, since_ms: i64, limit: usize) -> Result<Vec<StoredRecord>> {
        check_identifier(op_type)?;
        let q = if since_ms > 0 {
            // Second granularity in the query, exact bound applied below.
            format!(
                "select * from {op_type} where time > {}s limit {limit}",
                since_ms.div_euclid(1000) - 1
            )
        } else {
            format!("select * from {op_type} limit {limit}")
        };
        let mut records: Vec<StoredRecord> = self
            .query(&q)
            .map_err(|e| remediate(self, e))?
            .iter()
            .flat_map(SeriesResult::records)
            .filter(|r| r.timestamp_ms >= since_ms)
            .collect();
        records.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        records.truncate(limit);
        Ok(records)
    }

    fn write_user_attribute(&self, name: &str, value: FieldValue) -> Result<()> {
        check_identifier(name)?;
        tracing::debug!(attribute = name, value = %value, "Saving user attribute");
        let mut fields = Fields::new();
        fields.insert(name.to_string(), value);
        self.write_points(&encode_series(USER_SERIES, &fields))
            .map_err(|e| remediate(self, e))
    }

    fn read_user_attribute(&self, name: &str) -> Result<Option<FieldValue>> {
        check_identifier(name)?;
        // Points come back newest first; rows written for other attributes
        // carry a null here and are skipped.
        let results = self
            .query(&format!("select {name} from {USER_SERIES}"))
            .map_err(|e| remediate(self, e))?;
        Ok(results
            .iter()
            .flat_map(SeriesResult::records)
            .find_map(|mut r| r.fields.remove(name)))
    }

    fn dump(&self, since_secs: i64) -> Result<BTreeMap<String, String>> {
        self.dump_series(since_secs)
            .map_err(|e| remediate(self, e))
    }

    fn ensure_schema(&self) -> Result<()> {
        create_database(&self.client, &self.settings)
    }
}

impl InfluxDao {
    fn dump_series(&self, since_secs: i64) -> Result<BTreeMap<String, String>> {
        let mut dumped = BTreeMap::new();
        for name in self.list_series()? {
            if check_identifier(&name).is_err() {
                tracing::warn!(series = %name, "Skipping series with unsupported name");
                continue;
            }
            let results =
                self.query(&format!("select * from {name} where time > {since_secs}s limit 1"))?;
            dumped.insert(name, serde_json::to_string(&results)?);
        }
        Ok(dumped)
    }
}

/// Creates the configured database. An already existing database is fine.
pub fn create_database(client: &Client, settings: &InfluxSettings) -> Result<()> {
    tracing::warn!(database = %settings.database, "Creating InfluxDB database");
    let resp = client
        .post(format!("{}/db", settings.base_url))
        .query(&settings.credentials())
        .json(&serde_json::json!({ "name": settings.database }))
        .send()?;
    if resp.status() == StatusCode::CONFLICT {
        return Ok(());
    }
    check_status(resp)?;
    Ok(())
}

fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(StorageError::Rejected {
        status: status.as_u16(),
        body: resp.text().unwrap_or_default(),
    })
}

pub struct InfluxPlugin;

impl BackendPlugin for InfluxPlugin {
    fn name(&self) -> &str {
        "influx"
    }

    fn create(&self, config: &NodeConfig) -> Result<Box<dyn Dao>> {
        let signer = RecordSigner::from_identity(&config.identity());
        Ok(Box::new(InfluxDao::connect(
            InfluxSettings::from_config(config),
            signer,
        )?))
    }

    fn remediate(&self, config: &NodeConfig) -> Result<()> {
        let settings = InfluxSettings::from_config(config);
        create_database(&settings.client()?, &settings)
    }
}
