//! `vault` importer: certificates stored in a HashiCorp Vault KV v2 engine.
//!
//! Every secret under `<mount>/<path>` is expected to hold a `cert` field
//! (PEM chain, leaf first) and a `key` field (PEM private key).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use certsync_aggregator::CertificateLedger;
use certsync_core::{pem, AdapterOptions, CertificatePackage};
use certsync_daemon::{AdapterError, AdapterInfo, Importer};

pub const DEFAULT_ADDR: &str = "https://localhost:8200";
pub const DEFAULT_MOUNT: &str = "kv";
pub const DEFAULT_PATH: &str = "infrastructure/le-certs";
pub const DEFAULT_INTERVAL_SECS: u64 = 10;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct VaultSettings {
    addr: String,
    token: String,
    mount: String,
    path: String,
    interval: Duration,
}

impl VaultSettings {
    fn from_options(options: &AdapterOptions) -> Result<Self, AdapterError> {
        Ok(Self {
            addr: options.get("addr", DEFAULT_ADDR).trim_end_matches('/').to_owned(),
            token: options.require("token")?.to_owned(),
            mount: options.get("mount", DEFAULT_MOUNT).trim_matches('/').to_owned(),
            path: options.get("path", DEFAULT_PATH).trim_matches('/').to_owned(),
            interval: Duration::from_secs(options.parse("interval_secs", DEFAULT_INTERVAL_SECS)?),
        })
    }

    fn list_url(&self) -> String {
        format!("{}/v1/{}/metadata/{}?list=true", self.addr, self.mount, self.path)
    }

    fn secret_url(&self, key: &str) -> String {
        format!("{}/v1/{}/data/{}/{}", self.addr, self.mount, self.path, key)
    }
}

#[derive(Debug, Deserialize)]
struct VaultResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KvVersion {
    data: Option<StoredCertificate>,
}

#[derive(Debug, Deserialize)]
struct StoredCertificate {
    cert: Option<String>,
    key: Option<String>,
}

/// Why a listed secret produced no package.
#[derive(Debug)]
enum SecretError {
    /// Vault could not be asked, so the secret's state is unknown.
    Unavailable(AdapterError),
    /// Vault answered but the secret holds no usable certificate.
    Invalid(AdapterError),
}

#[derive(Clone)]
struct VaultClient {
    agent: ureq::Agent,
    settings: VaultSettings,
}

impl VaultClient {
    fn new(settings: VaultSettings) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self { agent, settings }
    }

    fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>, AdapterError> {
        let response = match self
            .agent
            .get(url)
            .set("X-Vault-Token", &self.settings.token)
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(ureq::Error::Status(code, _)) => {
                return Err(AdapterError::Remote(format!("vault returned HTTP {code} for {url}")))
            }
            Err(err) => return Err(AdapterError::Remote(format!("vault request failed: {err}"))),
        };
        response
            .into_json::<T>()
            .map(Some)
            .map_err(|err| AdapterError::Remote(format!("invalid vault response from {url}: {err}")))
    }

    /// Secret names under the configured path. A missing path lists as empty.
    fn list(&self) -> Result<Vec<String>, AdapterError> {
        let listing: Option<VaultResponse<KeyList>> = self.get(&self.settings.list_url())?;
        Ok(listing
            .map(|listing| listing.data.keys)
            .unwrap_or_default()
            .into_iter()
            .filter(|key| !key.ends_with('/'))
            .collect())
    }

    fn read(&self, key: &str) -> Result<CertificatePackage, SecretError> {
        let invalid = |msg: String| SecretError::Invalid(AdapterError::Remote(msg));
        let secret: VaultResponse<KvVersion> = self
            .get(&self.settings.secret_url(key))
            .map_err(SecretError::Unavailable)?
            .ok_or_else(|| invalid(format!("secret {key} disappeared")))?;
        let stored = secret
            .data
            .data
            .ok_or_else(|| invalid(format!("secret {key} has no data")))?;
        match (stored.cert, stored.key) {
            (Some(cert), Some(key_pem)) => pem::parse_package(&cert, Some(&key_pem))
                .map_err(|err| SecretError::Invalid(err.into())),
            _ => Err(invalid(format!("unable to get cert and key for {key}"))),
        }
    }

    /// One full poll. Listing failures are fatal; per-secret failures are
    /// returned alongside the secret name.
    fn poll(&self) -> Result<Vec<(String, Result<CertificatePackage, SecretError>)>, AdapterError> {
        let keys = self.list()?;
        Ok(keys
            .into_iter()
            .map(|key| {
                let package = self.read(&key);
                (key, package)
            })
            .collect())
    }
}

#[derive(Default)]
pub struct VaultImporter {
    client: Option<VaultClient>,
}

impl VaultImporter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Importer for VaultImporter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new("vault")
            .option("addr", "vault address (default https://localhost:8200)")
            .option("token", "vault token (required)")
            .option("mount", "KV v2 mount (default kv)")
            .option("path", "secret path below the mount (default infrastructure/le-certs)")
            .option("interval_secs", "seconds between polls (default 10)")
    }

    fn configure(&mut self, options: &AdapterOptions) -> Result<(), AdapterError> {
        let settings = VaultSettings::from_options(options)?;
        tracing::debug!(addr = %settings.addr, mount = %settings.mount, path = %settings.path, "vault configured");
        self.client = Some(VaultClient::new(settings));
        Ok(())
    }

    async fn run(
        &self,
        ledger: &CertificateLedger,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        let client = self.client.clone().ok_or(AdapterError::NotConfigured)?;
        let interval = client.settings.interval;

        loop {
            let poll = tokio::task::spawn_blocking({
                let client = client.clone();
                move || client.poll()
            });
            let entries = tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                joined = poll => joined
                    .map_err(|err| AdapterError::Remote(format!("vault poll task failed: {err}")))??,
            };

            reconcile(ledger, entries).await?;

            tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

/// Apply one poll to the ledger. Returns `false` when the round was skipped
/// because some secret could not be fetched; sweeping then would report a
/// certificate that still exists as removed.
async fn reconcile(
    ledger: &CertificateLedger,
    entries: Vec<(String, Result<CertificatePackage, SecretError>)>,
) -> Result<bool, AdapterError> {
    let unavailable = entries.iter().find_map(|(key, package)| match package {
        Err(SecretError::Unavailable(err)) => Some((key, err)),
        _ => None,
    });
    if let Some((key, err)) = unavailable {
        tracing::warn!(secret = %key, error = %err, "vault secret unavailable; keeping previous state this round");
        return Ok(false);
    }

    let mut round = ledger.begin_round().await;
    for (key, package) in entries {
        match package {
            Ok(package) => {
                let common_name = package.certificate.common_name().map(str::to_owned);
                if round.confirm(package) {
                    tracing::info!(secret = %key, common_name = ?common_name, "vault: new cert");
                }
            }
            Err(SecretError::Invalid(err) | SecretError::Unavailable(err)) => {
                tracing::warn!(secret = %key, error = %err, "skipping unreadable vault secret");
            }
        }
    }
    round.sweep();
    round.end().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use certsync_aggregator::BroadcastHub;
    use certsync_core::{Certificate, CertificateId, HubConfig};

    use super::*;

    fn package(serial: u64) -> CertificatePackage {
        CertificatePackage::leaf(Certificate::from_parts(serial, vec![0x30, serial as u8], None))
    }

    fn remote(msg: &str) -> AdapterError {
        AdapterError::Remote(msg.to_owned())
    }

    async fn seeded(hub: &BroadcastHub) -> CertificateLedger {
        let ledger = hub.ledger("vault");
        let applied = reconcile(&ledger, vec![("a.example".to_owned(), Ok(package(1)))])
            .await
            .expect("seed");
        assert!(applied);
        ledger
    }

    fn options(pairs: &[(&str, &str)]) -> AdapterOptions {
        pairs.iter().copied().collect()
    }

    #[test]
    fn token_is_required() {
        let mut vault = VaultImporter::new();
        let err = vault.configure(&options(&[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: cannot get key \"token\""
        );
    }

    #[test]
    fn urls_follow_kv_v2_layout() {
        let settings = VaultSettings::from_options(&options(&[
            ("addr", "http://vault:8200/"),
            ("token", "t"),
            ("mount", "/secret/"),
            ("path", "tls/certs"),
        ]))
        .expect("settings");
        assert_eq!(
            settings.list_url(),
            "http://vault:8200/v1/secret/metadata/tls/certs?list=true"
        );
        assert_eq!(
            settings.secret_url("example.com"),
            "http://vault:8200/v1/secret/data/tls/certs/example.com"
        );
        assert_eq!(settings.interval, Duration::from_secs(DEFAULT_INTERVAL_SECS));
    }

    #[tokio::test]
    async fn run_without_configure_fails() {
        let (hub, _worker) = certsync_aggregator::BroadcastHub::new(Default::default());
        let ledger = hub.ledger("vault");
        let err = VaultImporter::new()
            .run(&ledger, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotConfigured));
    }

    #[tokio::test]
    async fn unavailable_secret_skips_the_round() {
        let (hub, _worker) = BroadcastHub::new(HubConfig::default());
        let ledger = seeded(&hub).await;
        let before = ledger.diff().await;

        let applied = reconcile(
            &ledger,
            vec![
                (
                    "a.example".to_owned(),
                    Err(SecretError::Unavailable(remote("vault returned HTTP 503"))),
                ),
                ("b.example".to_owned(), Ok(package(2))),
            ],
        )
        .await
        .expect("reconcile");

        assert!(!applied);
        assert!(ledger.contains(&CertificateId::from(1u64)).await);
        assert!(!ledger.contains(&CertificateId::from(2u64)).await);
        assert_eq!(ledger.diff().await, before, "no round was committed");
    }

    #[tokio::test]
    async fn invalid_secret_is_swept() {
        let (hub, _worker) = BroadcastHub::new(HubConfig::default());
        let ledger = seeded(&hub).await;

        let applied = reconcile(
            &ledger,
            vec![(
                "a.example".to_owned(),
                Err(SecretError::Invalid(remote("unable to get cert and key for a.example"))),
            )],
        )
        .await
        .expect("reconcile");

        assert!(applied);
        assert!(ledger.is_empty().await);
        let diff = ledger.diff().await;
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].id(), &CertificateId::from(1u64));
    }
}
