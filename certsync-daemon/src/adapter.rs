//! Importer/exporter contracts and the registry of available adapters.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use certsync_aggregator::{CertificateLedger, Subscription};
use certsync_core::{AdapterKind, AdapterOptions, Config};

use crate::error::{AdapterError, DaemonError};

/// Name and option documentation for an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub config_help: Vec<(String, String)>,
}

impl AdapterInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_help: Vec::new(),
        }
    }

    pub fn option(mut self, key: impl Into<String>, help: impl Into<String>) -> Self {
        self.config_help.push((key.into(), help.into()));
        self
    }
}

/// A source of certificates.
///
/// `run` performs one ledger round per poll and returns on cancellation or
/// unrecoverable error; either way the supervisor restarts it.
#[async_trait]
pub trait Importer: Send + Sync {
    fn info(&self) -> AdapterInfo;

    fn configure(&mut self, options: &AdapterOptions) -> Result<(), AdapterError>;

    async fn run(
        &self,
        ledger: &CertificateLedger,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError>;
}

/// A consumer of change events.
///
/// `run` reads from `subscription` until it closes or `cancel` fires. The
/// subscription is released when `run` returns.
#[async_trait]
pub trait Exporter: Send + Sync {
    fn info(&self) -> AdapterInfo;

    fn configure(&mut self, options: &AdapterOptions) -> Result<(), AdapterError>;

    async fn run(
        &self,
        subscription: Subscription,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError>;
}

/// Every adapter implementation known to the process, configured or not.
#[derive(Default)]
pub struct AdapterRegistry {
    importers: Vec<Box<dyn Importer>>,
    exporters: Vec<Box<dyn Exporter>>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("importers", &names(self.importer_infos()))
            .field("exporters", &names(self.exporter_infos()))
            .finish()
    }
}

fn names(infos: Vec<AdapterInfo>) -> Vec<String> {
    infos.into_iter().map(|info| info.name).collect()
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_importer(&mut self, importer: impl Importer + 'static) -> &mut Self {
        tracing::debug!(adapter = %importer.info().name, "discovered import client");
        self.importers.push(Box::new(importer));
        self
    }

    pub fn register_exporter(&mut self, exporter: impl Exporter + 'static) -> &mut Self {
        tracing::debug!(adapter = %exporter.info().name, "discovered export client");
        self.exporters.push(Box::new(exporter));
        self
    }

    pub fn importer_infos(&self) -> Vec<AdapterInfo> {
        self.importers.iter().map(|i| i.info()).collect()
    }

    pub fn exporter_infos(&self) -> Vec<AdapterInfo> {
        self.exporters.iter().map(|e| e.info()).collect()
    }

    /// Configure every allow-listed adapter.
    ///
    /// Adapters whose `configure` fails are excluded. Fails when no importer
    /// or no exporter remains.
    pub fn configure(self, config: &Config) -> Result<ConfiguredAdapters, DaemonError> {
        let mut importers: Vec<Arc<dyn Importer>> = Vec::new();
        for mut importer in self.importers {
            let name = importer.info().name;
            if !admit(config, AdapterKind::Importer, &name) {
                continue;
            }
            match importer.configure(&config.options_for(AdapterKind::Importer, &name)) {
                Ok(()) => importers.push(Arc::from(importer)),
                Err(err) => {
                    tracing::error!(adapter = %name, error = %err, "error while configuring importer; excluded");
                }
            }
        }

        let mut exporters: Vec<Arc<dyn Exporter>> = Vec::new();
        for mut exporter in self.exporters {
            let name = exporter.info().name;
            if !admit(config, AdapterKind::Exporter, &name) {
                continue;
            }
            match exporter.configure(&config.options_for(AdapterKind::Exporter, &name)) {
                Ok(()) => exporters.push(Arc::from(exporter)),
                Err(err) => {
                    tracing::error!(adapter = %name, error = %err, "error while configuring exporter; excluded");
                }
            }
        }

        if importers.is_empty() || exporters.is_empty() {
            return Err(DaemonError::NoAdapters {
                importers: importers.len(),
                exporters: exporters.len(),
            });
        }
        Ok(ConfiguredAdapters {
            importers,
            exporters,
        })
    }
}

fn admit(config: &Config, kind: AdapterKind, name: &str) -> bool {
    if config.is_enabled(kind, name) {
        tracing::info!(adapter = %name, %kind, "initializing client");
        true
    } else {
        tracing::info!(adapter = %name, %kind, "client not allow-listed");
        false
    }
}

/// The adapters that passed configuration and will be supervised.
#[derive(Clone)]
pub struct ConfiguredAdapters {
    pub importers: Vec<Arc<dyn Importer>>,
    pub exporters: Vec<Arc<dyn Exporter>>,
}

impl fmt::Debug for ConfiguredAdapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredAdapters")
            .field("importers", &self.importer_names())
            .field("exporters", &self.exporter_names())
            .finish()
    }
}

impl ConfiguredAdapters {
    pub fn importer_names(&self) -> Vec<String> {
        self.importers.iter().map(|i| i.info().name).collect()
    }

    pub fn exporter_names(&self) -> Vec<String> {
        self.exporters.iter().map(|e| e.info().name).collect()
    }
}
