//! Restart loops keeping every configured adapter running.
//!
//! ```text
//! Running -> StoppedCleanly | StoppedByError -> WaitingToRestart -> Running
//!                                 (cancellation) -> ShutDown
//! ```
//!
//! Restarts are unconditional with a fixed delay. Cancellation is
//! cooperative: adapters are expected to observe the token and return.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use certsync_aggregator::BroadcastHub;
use certsync_core::AdapterKind;

use crate::adapter::{ConfiguredAdapters, Exporter, Importer};
use crate::error::AdapterError;

/// Lifecycle state of one supervised adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Running,
    StoppedCleanly,
    StoppedByError,
    WaitingToRestart,
    ShutDown,
}

/// Outcome of one adapter's supervision loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisionReport {
    pub name: String,
    pub kind: AdapterKind,
    pub starts: u64,
    pub failures: u64,
    pub state: AdapterState,
}

impl SupervisionReport {
    fn new(name: String, kind: AdapterKind) -> Self {
        Self {
            name,
            kind,
            starts: 0,
            failures: 0,
            state: AdapterState::WaitingToRestart,
        }
    }

    fn transition(&mut self, state: AdapterState) {
        tracing::debug!(adapter = %self.name, kind = %self.kind, from = ?self.state, to = ?state, "adapter state change");
        self.state = state;
    }
}

/// Drives every configured importer and exporter until cancellation.
pub struct Supervisor {
    hub: BroadcastHub,
    adapters: ConfiguredAdapters,
    restart_delay: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("adapters", &self.adapters)
            .field("restart_delay", &self.restart_delay)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(
        hub: BroadcastHub,
        adapters: ConfiguredAdapters,
        restart_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            hub,
            adapters,
            restart_delay,
            cancel,
        }
    }

    /// Run every supervision loop; returns once all of them have shut down.
    pub async fn run(self) -> Vec<SupervisionReport> {
        let mut loops = JoinSet::new();

        for importer in &self.adapters.importers {
            loops.spawn(supervise_importer(
                Arc::clone(importer),
                self.hub.clone(),
                self.restart_delay,
                self.cancel.clone(),
            ));
        }
        for exporter in &self.adapters.exporters {
            loops.spawn(supervise_exporter(
                Arc::clone(exporter),
                self.hub.clone(),
                self.restart_delay,
                self.cancel.clone(),
            ));
        }

        let mut reports = Vec::new();
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(err) => tracing::error!(error = %err, "supervision loop failed"),
            }
        }
        tracing::info!(adapters = reports.len(), "all clients finished");
        reports
    }
}

/// Supervise one importer. Its ledger is created once and reused across
/// restarts so a restart does not re-report known certificates.
pub async fn supervise_importer(
    importer: Arc<dyn Importer>,
    hub: BroadcastHub,
    restart_delay: Duration,
    cancel: CancellationToken,
) -> SupervisionReport {
    let name = importer.info().name;
    let ledger = hub.ledger(name.clone());
    let token = cancel.clone();
    supervise(name, AdapterKind::Importer, restart_delay, cancel, move || {
        let importer = Arc::clone(&importer);
        let ledger = ledger.clone();
        let cancel = token.clone();
        async move { importer.run(&ledger, cancel).await }
    })
    .await
}

/// Supervise one exporter. Every start gets a fresh subscription, released
/// when the run returns.
pub async fn supervise_exporter(
    exporter: Arc<dyn Exporter>,
    hub: BroadcastHub,
    restart_delay: Duration,
    cancel: CancellationToken,
) -> SupervisionReport {
    let name = exporter.info().name;
    let token = cancel.clone();
    supervise(name, AdapterKind::Exporter, restart_delay, cancel, move || {
        let exporter = Arc::clone(&exporter);
        let hub = hub.clone();
        let cancel = token.clone();
        async move {
            let subscription = hub.subscribe().await;
            exporter.run(subscription, cancel).await
        }
    })
    .await
}

/// Restart loop shared by importers and exporters.
///
/// Each run happens on its own task so a panicking adapter counts as a
/// failure instead of ending supervision.
pub async fn supervise<F, Fut>(
    name: String,
    kind: AdapterKind,
    restart_delay: Duration,
    cancel: CancellationToken,
    mut start: F,
) -> SupervisionReport
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), AdapterError>> + Send + 'static,
{
    let mut report = SupervisionReport::new(name, kind);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        report.starts += 1;
        report.transition(AdapterState::Running);
        tracing::info!(adapter = %report.name, %kind, start = report.starts, "client started");

        match tokio::spawn(start()).await {
            Ok(Ok(())) => {
                report.transition(AdapterState::StoppedCleanly);
                tracing::info!(adapter = %report.name, %kind, "client returned");
            }
            Ok(Err(AdapterError::Cancelled)) if cancel.is_cancelled() => {
                report.transition(AdapterState::StoppedCleanly);
                tracing::info!(adapter = %report.name, %kind, "client cancelled");
            }
            Ok(Err(err)) => {
                report.failures += 1;
                report.transition(AdapterState::StoppedByError);
                tracing::warn!(adapter = %report.name, %kind, error = %err, "client terminated with error");
            }
            Err(err) => {
                report.failures += 1;
                report.transition(AdapterState::StoppedByError);
                tracing::error!(adapter = %report.name, %kind, error = %err, "client task panicked");
            }
        }

        report.transition(AdapterState::WaitingToRestart);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(restart_delay) => {
                tracing::info!(adapter = %report.name, %kind, "restarting client");
            }
        }
    }

    report.transition(AdapterState::ShutDown);
    report
}
