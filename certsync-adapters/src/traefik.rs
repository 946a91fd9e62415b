//! `traefik` exporter: PEM files on disk plus a Traefik dynamic
//! configuration file pointing at them.
//!
//! Layout under `base_location`:
//!
//! ```text
//! <base>/<source>/<serial>/cert.pem
//! <base>/<source>/<serial>/key.pem
//! <base>/traefik.yaml
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use certsync_aggregator::Subscription;
use certsync_core::{pem, AdapterOptions, CertificatePackage, ChangeEvent};
use certsync_daemon::{io_err, AdapterError, AdapterInfo, Exporter};

pub const CONFIG_FILE: &str = "traefik.yaml";
pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraefikConfig {
    pub tls: TlsSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSection {
    pub certificates: Vec<CertificateFiles>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateFiles {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone)]
pub struct TraefikExporter {
    base: PathBuf,
}

impl Default for TraefikExporter {
    fn default() -> Self {
        Self {
            base: std::env::temp_dir(),
        }
    }
}

impl TraefikExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Apply one change event to disk and regenerate the Traefik config.
    ///
    /// Failures on individual packages are logged and skipped. Returns the
    /// number of certificate pairs referenced by the new config.
    pub fn apply(&self, event: &ChangeEvent) -> Result<usize, AdapterError> {
        let source_dir = self.base.join(&event.source);

        for package in &event.diff.added {
            let dir = source_dir.join(package.id().as_str());
            tracing::info!(
                path = %dir.display(),
                common_name = ?package.certificate.common_name(),
                "writing key and cert",
            );
            if let Err(err) = write_package(&dir, package) {
                tracing::warn!(id = %package.id(), error = %err, "could not write certificate");
            }
        }

        for package in &event.diff.removed {
            let dir = source_dir.join(package.id().as_str());
            match fs::remove_dir_all(&dir) {
                Ok(()) => tracing::info!(path = %dir.display(), "removed stale certificate"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %dir.display(), error = %err, "could not remove stale certificate");
                }
            }
        }

        let config = scan(&self.base)?;
        let yaml = serde_yaml::to_string(&config)
            .map_err(|err| AdapterError::Remote(format!("could not create traefik config: {err}")))?;
        write_atomic(&self.base.join(CONFIG_FILE), yaml.as_bytes())?;
        Ok(config.tls.certificates.len())
    }
}

#[async_trait]
impl Exporter for TraefikExporter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new("traefik").option("base_location", "where to store all certs")
    }

    fn configure(&mut self, options: &AdapterOptions) -> Result<(), AdapterError> {
        let fallback = std::env::temp_dir();
        let base = PathBuf::from(options.get("base_location", &fallback.to_string_lossy()));
        self.base = if base.is_absolute() {
            base
        } else {
            std::env::current_dir()
                .map_err(|source| io_err(&base, source))?
                .join(base)
        };
        Ok(())
    }

    async fn run(
        &self,
        mut subscription: Subscription,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        fs::create_dir_all(&self.base).map_err(|source| io_err(&self.base, source))?;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => return Ok(()),
                },
            };

            let exporter = self.clone();
            let applied = tokio::task::spawn_blocking(move || exporter.apply(&event))
                .await
                .map_err(|err| AdapterError::Remote(format!("traefik write task failed: {err}")))?;
            match applied {
                Ok(pairs) => tracing::debug!(pairs, "traefik config regenerated"),
                Err(err) => tracing::warn!(error = %err, "could not update traefik config"),
            }
        }
    }
}

fn write_package(dir: &Path, package: &CertificatePackage) -> Result<(), AdapterError> {
    fs::create_dir_all(dir).map_err(|source| io_err(dir, source))?;
    set_mode(dir, 0o711)?;
    write_atomic(&dir.join(CERT_FILE), pem::encode_package_chain(package).as_bytes())?;
    match &package.key {
        Some(key) => write_atomic(&dir.join(KEY_FILE), pem::encode_private_key(key).as_bytes()),
        None => {
            tracing::warn!(id = %package.id(), "certificate has no private key; key.pem not written");
            Ok(())
        }
    }
}

/// Every `<source>/<serial>` directory holding both PEM files, sorted.
fn scan(base: &Path) -> Result<TraefikConfig, AdapterError> {
    let mut certificates = Vec::new();

    for source in fs::read_dir(base).map_err(|source| io_err(base, source))? {
        let source = source.map_err(|err| io_err(base, err))?;
        if !source.path().is_dir() {
            continue;
        }
        let entries = match fs::read_dir(source.path()) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %source.path().display(), error = %err, "could not list directory");
                continue;
            }
        };
        for pair in entries.flatten() {
            let dir = pair.path();
            if !dir.is_dir() {
                continue;
            }
            let cert_file = dir.join(CERT_FILE);
            let key_file = dir.join(KEY_FILE);
            if !cert_file.is_file() || !key_file.is_file() {
                tracing::debug!(path = %dir.display(), "could not find key or cert file");
                continue;
            }
            certificates.push(CertificateFiles {
                cert_file: cert_file.to_string_lossy().into_owned(),
                key_file: key_file.to_string_lossy().into_owned(),
            });
        }
    }

    certificates.sort();
    Ok(TraefikConfig {
        tls: TlsSection { certificates },
    })
}

/// Write flow: `<name>.tmp` sibling, `chmod 0600`, `rename`.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AdapterError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    fs::write(&tmp, contents).map_err(|source| io_err(&tmp, source))?;
    set_mode(&tmp, 0o600)?;
    fs::rename(&tmp, path).map_err(|source| io_err(path, source))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), AdapterError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| io_err(path, source))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), AdapterError> {
    Ok(())
}
