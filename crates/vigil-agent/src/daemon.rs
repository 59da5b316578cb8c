//! Process driver: one blocking worker owns the backend and runs cycles on
//! demand, the async side feeds it ticks until shutdown or until it stops.

use crate::Agent;
use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::interval;
use vigil_common::config::NodeConfig;
use vigil_storage::BackendRegistry;

pub type Worker = JoinHandle<Result<()>>;

/// Opens the backend and runs one cycle per message received. Ends when the
/// sender is dropped or on the first error.
pub fn spawn_worker(config: NodeConfig) -> (mpsc::Sender<()>, Worker) {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let worker = tokio::task::spawn_blocking(move || -> Result<()> {
        let dao = BackendRegistry::default()
            .open(&config)
            .context("Failed to open storage backend")?;
        let agent = Agent::new(config, dao)?;
        while rx.blocking_recv().is_some() {
            let report = agent.run_cycle()?;
            tracing::info!(
                updated = report.updated,
                dumped = report.dumped,
                tasks = ?report.tasks,
                "Cycle complete"
            );
        }
        Ok(())
    });
    (tx, worker)
}

/// Runs a single cycle and waits for the worker to finish.
pub async fn run_once(tx: mpsc::Sender<()>, worker: Worker) -> Result<()> {
    let _ = tx.send(()).await;
    drop(tx);
    finish(worker.await)
}

/// Sends a tick every `period` until `shutdown` resolves or the worker stops
/// on its own. A tick that arrives while a cycle is running is skipped.
pub async fn run_loop<S>(
    tx: mpsc::Sender<()>,
    mut worker: Worker,
    period: Duration,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut tick = interval(period);
    tracing::info!(interval_secs = period.as_secs(), "Starting cycle loop");

    let finished = loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(mpsc::error::TrySendError::Full(())) = tx.try_send(()) {
                    tracing::debug!("Previous cycle still running, skipping tick");
                }
            }
            result = &mut worker => break Some(result),
            _ = &mut shutdown => {
                tracing::info!("Shutting down gracefully");
                break None;
            }
        }
    };
    drop(tx);

    match finished {
        Some(result) => finish(result),
        None => finish(worker.await),
    }
}

fn finish(result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match result.context("Cycle worker panicked")? {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Agent stopped");
            Err(e)
        }
    }
}
