use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use vigil_agent::{daemon, logging};
use vigil_common::config::NodeConfig;

const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 3600;

struct Args {
    install_dir: PathBuf,
    once: bool,
}

fn parse_args() -> Args {
    let mut install_dir = None;
    let mut once = false;
    for arg in std::env::args().skip(1) {
        if arg == "--once" {
            once = true;
        } else if install_dir.is_none() {
            install_dir = Some(PathBuf::from(arg));
        }
    }
    Args {
        install_dir: install_dir.unwrap_or_else(|| PathBuf::from(".")),
        once,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    let created = NodeConfig::bootstrap(&args.install_dir)?;
    let config = NodeConfig::load(&args.install_dir)?;
    let _log_guard = logging::init(&config)?;
    if created {
        tracing::warn!(
            config_file = %config.config_file().display(),
            "Created node config from default template"
        );
    }

    let interval_secs = config
        .get_parsed::<u64>("cycle_interval_secs")
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_CYCLE_INTERVAL_SECS);
    tracing::info!(
        version = %config.version(),
        controller = %config.controller(),
        database = config.get("database").unwrap_or_default(),
        "vigil-agent starting"
    );

    let (tx, worker) = daemon::spawn_worker(config);
    if args.once {
        daemon::run_once(tx, worker).await
    } else {
        let shutdown = async {
            let _ = signal::ctrl_c().await;
        };
        daemon::run_loop(tx, worker, Duration::from_secs(interval_secs), shutdown).await
    }
}
