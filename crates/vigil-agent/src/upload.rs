use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DUMP_PATH: &str = "dump";

/// Everything stored since the last dump, as delivered to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpBundle {
    pub version: String,
    /// Epoch seconds the dump starts from (the previous `last_dumped`).
    pub since: i64,
    pub generated_at: i64,
    /// Series name to serialized payload, as returned by `Dao::dump`.
    pub series: BTreeMap<String, String>,
}

pub struct DumpUploader {
    client: Client,
    url: String,
}

impl DumpUploader {
    pub fn new(controller: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for dump upload")?;
        Ok(Self {
            client,
            url: format!("{}/{DUMP_PATH}", controller.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn upload(&self, bundle: &DumpBundle) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(bundle)
            .send()
            .with_context(|| format!("Failed to send dump to {}", self.url))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            bail!("Controller rejected dump with status {status}: {body}");
        }
        tracing::info!(url = %self.url, series = bundle.series.len(), "Dump uploaded");
        Ok(())
    }
}
