//! `mock` importer: a certificate that appears and disappears on every poll.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use certsync_aggregator::CertificateLedger;
use certsync_core::{AdapterOptions, Certificate, CertificatePackage};
use certsync_daemon::{AdapterError, AdapterInfo, Importer};

pub const DEFAULT_INTERVAL_SECS: u64 = 4;
pub const DEFAULT_SERIAL: u64 = 10567;

#[derive(Debug, Clone)]
pub struct MockImporter {
    interval: Duration,
    serial: u64,
}

impl Default for MockImporter {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            serial: DEFAULT_SERIAL,
        }
    }
}

impl MockImporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn package(&self) -> CertificatePackage {
        let certificate = Certificate::from_parts(
            self.serial,
            self.serial.to_be_bytes().to_vec(),
            Some(format!("mock-{}.certsync.invalid", self.serial)),
        );
        CertificatePackage::leaf(certificate)
    }
}

#[async_trait]
impl Importer for MockImporter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new("mock")
            .option("interval_secs", "seconds between polls (default 4)")
            .option("serial", "serial number of the generated certificate")
    }

    fn configure(&mut self, options: &AdapterOptions) -> Result<(), AdapterError> {
        self.interval = Duration::from_secs(options.parse("interval_secs", DEFAULT_INTERVAL_SECS)?);
        self.serial = options.parse("serial", DEFAULT_SERIAL)?;
        Ok(())
    }

    async fn run(
        &self,
        ledger: &CertificateLedger,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        tracing::info!(interval_secs = self.interval.as_secs(), "mock started");
        let mut present = ledger.is_empty().await;

        loop {
            let mut round = ledger.begin_round().await;
            if present {
                round.confirm(self.package());
            }
            round.sweep();
            round.end().await?;
            present = !present;

            tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
