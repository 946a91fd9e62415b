//! Importer -> ledger -> hub -> exporter through the daemon runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use certsync_aggregator::{CertificateLedger, Subscription};
use certsync_core::{AdapterOptions, Certificate, CertificatePackage, ChangeEvent, Config};
use certsync_daemon::{
    run_until, AdapterError, AdapterInfo, AdapterRegistry, AdapterState, DaemonError, Exporter,
    Importer,
};

/// Publishes a single, different certificate on every run, then returns.
struct RotatingImporter {
    serial: Arc<AtomicU64>,
}

#[async_trait]
impl Importer for RotatingImporter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new("rotating")
    }

    fn configure(&mut self, _options: &AdapterOptions) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn run(
        &self,
        ledger: &CertificateLedger,
        _cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        let mut round = ledger.begin_round().await;
        round.confirm(CertificatePackage::leaf(Certificate::from_parts(
            serial,
            serial.to_be_bytes().to_vec(),
            None,
        )));
        round.sweep();
        round.end().await?;
        Ok(())
    }
}

#[derive(Default)]
struct Recorded {
    events: Mutex<Vec<Arc<ChangeEvent>>>,
    runs: AtomicU64,
}

/// Records events; its first run fails after one event.
struct RecordingExporter {
    recorded: Arc<Recorded>,
}

#[async_trait]
impl Exporter for RecordingExporter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new("recorder")
    }

    fn configure(&mut self, _options: &AdapterOptions) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn run(
        &self,
        mut subscription: Subscription,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        let run = self.recorded.runs.fetch_add(1, Ordering::SeqCst) + 1;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => return Ok(()),
                },
            };
            self.recorded.events.lock().expect("lock").push(event);
            if run == 1 {
                return Err(AdapterError::Remote("disk full".to_string()));
            }
        }
    }
}

/// Never observes cancellation.
struct StubbornExporter;

#[async_trait]
impl Exporter for StubbornExporter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new("stubborn")
    }

    fn configure(&mut self, _options: &AdapterOptions) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn run(
        &self,
        _subscription: Subscription,
        _cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

fn config(yaml: &str) -> Config {
    Config::from_yaml_with_env(yaml, |_| None).expect("config")
}

#[tokio::test]
async fn events_reach_exporter_across_restarts() {
    let recorded = Arc::new(Recorded::default());
    let mut registry = AdapterRegistry::new();
    registry
        .register_importer(RotatingImporter {
            serial: Arc::new(AtomicU64::new(0)),
        })
        .register_exporter(RecordingExporter {
            recorded: Arc::clone(&recorded),
        });

    let cancel = CancellationToken::new();
    let daemon = tokio::spawn(run_until(
        config("importers: [rotating]\nexporters: [recorder]\nrestart_delay_ms: 10\n"),
        registry,
        cancel.clone(),
    ));

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let seen = recorded.events.lock().expect("lock").len();
            if seen >= 3 && recorded.runs.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("exporter saw events after its restart");

    cancel.cancel();
    let summary = daemon.await.expect("join").expect("clean shutdown");

    let events = recorded.events.lock().expect("lock").clone();
    assert!(summary.relayed >= events.len() as u64);
    for event in &events {
        assert_eq!(event.source, "rotating");
        assert_eq!(event.diff.added.len(), 1);
    }

    let exporter = summary
        .adapters
        .iter()
        .find(|report| report.name == "recorder")
        .expect("exporter report");
    assert!(exporter.failures >= 1);
    assert_eq!(exporter.state, AdapterState::ShutDown);

    let importer = summary
        .adapters
        .iter()
        .find(|report| report.name == "rotating")
        .expect("importer report");
    assert!(importer.starts >= 3);
    assert_eq!(importer.failures, 0);
}

#[tokio::test]
async fn missing_exporters_fail_before_anything_runs() {
    let mut registry = AdapterRegistry::new();
    registry
        .register_importer(RotatingImporter {
            serial: Arc::new(AtomicU64::new(0)),
        })
        .register_exporter(StubbornExporter);

    let err = run_until(
        config("importers: [rotating]\nexporters: []\n"),
        registry,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        DaemonError::NoAdapters {
            importers: 1,
            exporters: 0
        }
    ));
}

#[tokio::test]
async fn adapter_ignoring_cancellation_hits_shutdown_grace() {
    let mut registry = AdapterRegistry::new();
    registry
        .register_importer(RotatingImporter {
            serial: Arc::new(AtomicU64::new(0)),
        })
        .register_exporter(StubbornExporter);

    let cancel = CancellationToken::new();
    let daemon = tokio::spawn(run_until(
        config("importers: [rotating]\nexporters: [stubborn]\nshutdown_grace_ms: 50\n"),
        registry,
        cancel.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let err = daemon.await.expect("join").unwrap_err();
    assert!(matches!(err, DaemonError::ShutdownTimeout(grace) if grace == Duration::from_millis(50)));
}
