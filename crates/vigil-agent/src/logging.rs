use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use vigil_common::config::NodeConfig;

/// Installs the global subscriber: stdout always, plus `<install_dir>/<log_file>`
/// when the `log_file` key is set. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init(config: &NodeConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive("vigil=info".parse()?);

    let mut file_error = None;
    let (file_layer, guard) = match config.get("log_file").filter(|f| !f.is_empty()) {
        Some(name) => match RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(name)
            .build(config.install_dir())
        {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (
                    Some(fmt::layer().with_ansi(false).with_writer(writer)),
                    Some(guard),
                )
            }
            Err(e) => {
                file_error = Some(e);
                (None, None)
            }
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!(error = %e, "Cannot open log file, logging to stdout only");
    }
    Ok(guard)
}
