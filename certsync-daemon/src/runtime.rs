use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use certsync_aggregator::BroadcastHub;
use certsync_core::Config;

use crate::adapter::AdapterRegistry;
use crate::error::DaemonError;
use crate::supervisor::{SupervisionReport, Supervisor};

/// Output format of the process-wide tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// What happened during one daemon run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub relayed: u64,
    pub adapters: Vec<SupervisionReport>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(
    config: Config,
    registry: AdapterRegistry,
    log_format: LogFormat,
) -> Result<RunSummary, DaemonError> {
    init_tracing(log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| DaemonError::Io {
            path: "tokio-runtime".into(),
            source,
        })?;
    runtime.block_on(run(config, registry))
}

/// Run until ctrl-c.
pub async fn run(config: Config, registry: AdapterRegistry) -> Result<RunSummary, DaemonError> {
    let cancel = CancellationToken::new();

    let signal_handle: JoinHandle<Result<(), DaemonError>> = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("got interrupt; cancelling executing tasks");
                            cancel.cancel();
                            Ok(())
                        }
                        Err(err) => {
                            cancel.cancel();
                            Err(DaemonError::Signal(err.to_string()))
                        }
                    }
                }
            }
        })
    };

    let result = run_until(config, registry, cancel.clone()).await;
    cancel.cancel();
    handle_join("signal_handler", signal_handle.await)??;
    result
}

/// Configure adapters, then run the hub and supervisor until `cancel` fires.
///
/// Fails immediately when no importer or no exporter could be configured.
/// After cancellation every task must finish within the configured
/// shutdown grace period.
pub async fn run_until(
    config: Config,
    registry: AdapterRegistry,
    cancel: CancellationToken,
) -> Result<RunSummary, DaemonError> {
    let adapters = match registry.configure(&config) {
        Ok(adapters) => adapters,
        Err(err) => {
            tracing::error!(error = %err, "clients failed to configure");
            return Err(err);
        }
    };
    tracing::info!(
        importers = ?adapters.importer_names(),
        exporters = ?adapters.exporter_names(),
        "starting clients",
    );

    let (hub, worker) = BroadcastHub::new(config.hub);
    let hub_handle = tokio::spawn(worker.run(cancel.clone()));

    let supervisor = Supervisor::new(hub, adapters, config.restart_delay(), cancel.clone());
    let supervisor_handle = tokio::spawn(supervisor.run());

    cancel.cancelled().await;
    let grace = config.shutdown_grace();
    tracing::info!(grace_ms = grace.as_millis() as u64, "shutting down");

    let (hub_result, supervisor_result) =
        tokio::time::timeout(grace, async { tokio::join!(hub_handle, supervisor_handle) })
            .await
            .map_err(|_| DaemonError::ShutdownTimeout(grace))?;

    let relayed = handle_join("broadcast_hub", hub_result)?;
    let adapters = handle_join("supervisor", supervisor_result)?;
    tracing::info!(relayed, "bye");
    Ok(RunSummary { relayed, adapters })
}

fn handle_join<T>(
    task: &'static str,
    result: Result<T, tokio::task::JoinError>,
) -> Result<T, DaemonError> {
    result.map_err(|err| DaemonError::Join {
        task,
        message: err.to_string(),
    })
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
