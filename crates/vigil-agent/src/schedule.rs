//! Loading the measurement schedule: one JSON task spec per line, from the
//! controller or from the local schedule file.

use reqwest::blocking::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vigil_common::config::NodeConfig;
use vigil_common::types::ScheduleEntry;

pub const DEFAULT_SCHEDULE_FILE: &str = "schedule.dat";
pub const REMOTE_SCHEDULE_PATH: &str = "schedule.dat";

/// Why a remote schedule could not be fetched.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The controller answered with an error status.
    #[error("controller {url} could not fulfil the request (status {status})")]
    Rejected { url: String, status: u16 },

    /// The controller could not be reached.
    #[error("failed to reach controller {url}: {source}")]
    Unreachable {
        url: String,
        source: reqwest::Error,
    },

    #[error("unrecognised problem downloading schedule from {url}: {reason}")]
    Unrecognized { url: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleSource {
    Remote,
    Local,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    pub source: ScheduleSource,
    pub entries: Vec<ScheduleEntry>,
}

/// Parses schedule text. Blank and `#` lines are skipped; lines that are not
/// valid JSON are dropped without aborting the rest.
///
/// # Examples
///
/// ```
/// use vigil_agent::schedule::parse_schedule;
///
/// let entries = parse_schedule("# tasks\n{\"taskname\":\"ping\"}\nnot json\n");
/// assert_eq!(entries.len(), 1);
/// assert_eq!(entries[0].taskname(), Some("ping"));
/// ```
pub fn parse_schedule(text: &str) -> Vec<ScheduleEntry> {
    text.lines()
        .filter(|line| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(line, error = %e, "JSON task spec not parsed");
                None
            }
        })
        .collect()
}

/// Reads a schedule file. Fails only if the file cannot be read.
pub fn load_local(path: &Path) -> std::io::Result<Vec<ScheduleEntry>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_schedule(&text))
}

/// Location of the local schedule, from the `schedule` config key relative
/// to the install directory.
pub fn local_schedule_path(config: &NodeConfig) -> PathBuf {
    let file = config
        .get("schedule")
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SCHEDULE_FILE);
    config.install_dir().join(file)
}

pub struct ScheduleLoader {
    client: Client,
}

impl ScheduleLoader {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    /// Fetches the raw schedule text from `<controller>/schedule.dat`.
    pub fn fetch_remote(&self, controller: &str) -> Result<String, FetchError> {
        let url = format!(
            "{}/{REMOTE_SCHEDULE_PATH}",
            controller.trim_end_matches('/')
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| classify(&url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Rejected {
                url,
                status: status.as_u16(),
            });
        }
        resp.text().map_err(|e| FetchError::Unrecognized {
            url,
            reason: e.to_string(),
        })
    }

    /// Fetches and parses the remote schedule. A body with content but no
    /// parseable task is not a schedule.
    pub fn fetch_schedule(
        &self,
        controller: &str,
    ) -> Result<(String, Vec<ScheduleEntry>), FetchError> {
        let text = self.fetch_remote(controller)?;
        let entries = parse_schedule(&text);
        if entries.is_empty() && !text.trim().is_empty() {
            return Err(FetchError::Unrecognized {
                url: format!("{}/{REMOTE_SCHEDULE_PATH}", controller.trim_end_matches('/')),
                reason: "response contains no task specs".to_string(),
            });
        }
        Ok((text, entries))
    }

    /// Remote schedule, or `None` when it is unavailable for any reason.
    pub fn load_remote(&self, controller: &str) -> Option<Vec<ScheduleEntry>> {
        match self.fetch_schedule(controller) {
            Ok((_, entries)) => Some(entries),
            Err(e) => {
                log_fetch_error(&e);
                None
            }
        }
    }

    /// Refreshes from the controller and stores the result as the local
    /// schedule. Falls back to the existing local schedule when the
    /// controller is unavailable.
    pub fn refresh(&self, config: &NodeConfig) -> Option<Schedule> {
        let local = local_schedule_path(config);
        match self.fetch_schedule(config.controller()) {
            Ok((text, entries)) => {
                if let Err(e) = std::fs::write(&local, &text) {
                    tracing::warn!(path = %local.display(), error = %e, "Failed to store fetched schedule");
                }
                tracing::info!(tasks = entries.len(), "Fetched remote schedule");
                return Some(Schedule {
                    source: ScheduleSource::Remote,
                    entries,
                });
            }
            Err(e) => log_fetch_error(&e),
        }

        match load_local(&local) {
            Ok(entries) => {
                tracing::info!(path = %local.display(), tasks = entries.len(), "Using local schedule");
                Some(Schedule {
                    source: ScheduleSource::Local,
                    entries,
                })
            }
            Err(e) => {
                tracing::warn!(path = %local.display(), error = %e, "No schedule available");
                None
            }
        }
    }
}

fn classify(url: &str, e: reqwest::Error) -> FetchError {
    if let Some(status) = e.status() {
        return FetchError::Rejected {
            url: url.to_string(),
            status: status.as_u16(),
        };
    }
    if e.is_connect() || e.is_timeout() || e.is_request() {
        return FetchError::Unreachable {
            url: url.to_string(),
            source: e,
        };
    }
    FetchError::Unrecognized {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

fn log_fetch_error(e: &FetchError) {
    match e {
        FetchError::Rejected { url, status } => {
            tracing::error!(url = %url, status = *status, "Controller could not fulfil the schedule request")
        }
        FetchError::Unreachable { url, source } => {
            tracing::error!(url = %url, error = %source, "Failed to reach the controller")
        }
        FetchError::Unrecognized { url, reason } => {
            tracing::error!(url = %url, reason = %reason, "Unrecognised problem downloading remote schedule")
        }
    }
}
