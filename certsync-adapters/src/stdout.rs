//! `stdout` exporter: logs every change event.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use certsync_aggregator::Subscription;
use certsync_core::{AdapterOptions, ChangeEvent};
use certsync_daemon::{AdapterError, AdapterInfo, Exporter};

#[derive(Debug, Default, Clone)]
pub struct StdoutExporter {
    prefix: String,
}

impl StdoutExporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn summary(&self, event: &ChangeEvent) -> String {
        format!(
            "{}got {} additions, {} removals from store \"{}\"",
            self.prefix,
            event.diff.added.len(),
            event.diff.removed.len(),
            event.source,
        )
    }
}

#[async_trait]
impl Exporter for StdoutExporter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new("stdout").option("prefix", "prefix every message")
    }

    fn configure(&mut self, options: &AdapterOptions) -> Result<(), AdapterError> {
        self.prefix = options.get("prefix", "").to_owned();
        Ok(())
    }

    async fn run(
        &self,
        mut subscription: Subscription,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => return Ok(()),
                },
            };

            tracing::info!("{}", self.summary(&event));
            for package in &event.diff.added {
                tracing::debug!(id = %package.id(), common_name = ?package.certificate.common_name(), "added");
            }
            for package in &event.diff.removed {
                tracing::debug!(id = %package.id(), common_name = ?package.certificate.common_name(), "removed");
            }
        }
    }
}
