use crate::schedule::{ScheduleLoader, ScheduleSource};
use crate::scheduler;
use crate::upload::{DumpBundle, DumpUploader};
use anyhow::{Context, Result};
use std::time::Duration;
use vigil_common::config::NodeConfig;
use vigil_storage::Dao;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// What a single cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// A remote schedule was fetched and `last_updated` recorded.
    pub updated: bool,
    /// Tasks in the schedule loaded this cycle, if one was loaded.
    pub tasks: Option<usize>,
    /// The dump was delivered and `last_dumped` recorded.
    pub dumped: bool,
}

/// One node: its config, its storage backend and the controller clients.
pub struct Agent {
    config: NodeConfig,
    dao: Box<dyn Dao>,
    loader: ScheduleLoader,
    uploader: DumpUploader,
}

impl Agent {
    pub fn new(config: NodeConfig, dao: Box<dyn Dao>) -> Result<Self> {
        let timeout = Duration::from_secs(
            config
                .get_parsed("http_timeout_secs")
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );
        let loader = ScheduleLoader::new(timeout).context("Failed to build schedule client")?;
        let uploader = DumpUploader::new(config.controller(), timeout)?;
        Ok(Self {
            config,
            dao,
            loader,
            uploader,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn dao(&self) -> &dyn Dao {
        self.dao.as_ref()
    }

    /// Runs whichever of the update and dump halves are due. Storage errors
    /// abort the cycle; controller errors only skip the affected half.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let dao = self.dao();

        if scheduler::should_update(&self.config, dao).context("Checking update schedule")? {
            tracing::info!("Schedule update due");
            match self.loader.refresh(&self.config) {
                Some(schedule) => {
                    report.tasks = Some(schedule.entries.len());
                    if schedule.source == ScheduleSource::Remote {
                        scheduler::record_updated(dao).context("Recording schedule update")?;
                        report.updated = true;
                    } else {
                        tracing::warn!("Controller unavailable, update will be retried next cycle");
                    }
                }
                None => tracing::warn!("Schedule update failed"),
            }
        } else {
            tracing::debug!("No schedule update due");
        }

        if scheduler::should_dump(dao).context("Checking dump schedule")? {
            let since = scheduler::last_dumped(dao)?.unwrap_or(0);
            tracing::info!(since, "Dump due");
            let series = dao.dump(since).context("Dumping stored data")?;
            let bundle = DumpBundle {
                version: self.config.version().to_string(),
                since,
                generated_at: scheduler::now_secs(),
                series,
            };
            match self.uploader.upload(&bundle) {
                Ok(()) => {
                    scheduler::record_dumped(dao).context("Recording dump")?;
                    report.dumped = true;
                }
                Err(e) => tracing::warn!(error = %format!("{e:#}"), "Dump upload failed"),
            }
        } else {
            tracing::debug!("No dump due");
        }

        Ok(report)
    }
}
