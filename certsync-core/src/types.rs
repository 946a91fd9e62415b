//! Domain types for certificate tracking.
//!
//! Certificates are opaque to the aggregator: only their identity (serial
//! number) and exact DER content matter. Everything is cheap to clone so a
//! single [`ChangeEvent`] can be fanned out to many exporters.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identity of a certificate inside a ledger: the upper-case hex encoding of
/// its serial number, without leading zero bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CertificateId(pub String);

impl CertificateId {
    /// Build an identifier from the raw big-endian serial bytes.
    pub fn from_serial_bytes(serial: &[u8]) -> Self {
        let first = serial.iter().position(|b| *b != 0).unwrap_or(serial.len());
        let trimmed = &serial[first..];
        if trimmed.is_empty() {
            return Self("00".to_owned());
        }
        Self(hex::encode_upper(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CertificateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CertificateId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<u64> for CertificateId {
    fn from(serial: u64) -> Self {
        Self::from_serial_bytes(&serial.to_be_bytes())
    }
}

// ---------------------------------------------------------------------------
// Certificates and keys
// ---------------------------------------------------------------------------

#[derive(PartialEq, Eq)]
struct CertificateInner {
    id: CertificateId,
    common_name: Option<String>,
    der: Vec<u8>,
}

/// A single DER-encoded X.509 certificate with its identity extracted.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate(Arc<CertificateInner>);

impl Certificate {
    /// Parse a DER certificate, extracting its serial number and subject CN.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self, CoreError> {
        let der = der.into();
        let (id, common_name) = {
            let (_, parsed) = X509Certificate::from_der(&der)
                .map_err(|e| CoreError::Certificate(e.to_string()))?;
            let id = CertificateId::from_serial_bytes(parsed.raw_serial());
            let common_name = parsed
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(str::to_owned);
            (id, common_name)
        };
        Ok(Self(Arc::new(CertificateInner {
            id,
            common_name,
            der,
        })))
    }

    /// Build a certificate whose identity is already known to the caller.
    ///
    /// The DER bytes are not parsed.
    pub fn from_parts(
        id: impl Into<CertificateId>,
        der: impl Into<Vec<u8>>,
        common_name: Option<String>,
    ) -> Self {
        Self(Arc::new(CertificateInner {
            id: id.into(),
            common_name,
            der: der.into(),
        }))
    }

    pub fn id(&self) -> &CertificateId {
        &self.0.id
    }

    pub fn common_name(&self) -> Option<&str> {
        self.0.common_name.as_deref()
    }

    pub fn der(&self) -> &[u8] {
        &self.0.der
    }

    /// Byte-for-byte equality of the encoded certificate.
    pub fn same_content(&self, other: &Certificate) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.der == other.0.der
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("id", &self.0.id)
            .field("common_name", &self.0.common_name)
            .field("der_len", &self.0.der.len())
            .finish()
    }
}

/// Encoding of a private key's DER bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    Pkcs1,
    Pkcs8,
    Sec1,
}

impl KeyFormat {
    /// PEM block label for this encoding.
    pub fn pem_label(self) -> &'static str {
        match self {
            KeyFormat::Pkcs1 => "RSA PRIVATE KEY",
            KeyFormat::Pkcs8 => "PRIVATE KEY",
            KeyFormat::Sec1 => "EC PRIVATE KEY",
        }
    }
}

/// Private key material. `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    format: KeyFormat,
    der: Arc<Vec<u8>>,
}

impl PrivateKey {
    pub fn new(format: KeyFormat, der: impl Into<Vec<u8>>) -> Self {
        Self {
            format,
            der: Arc::new(der.into()),
        }
    }

    pub fn format(&self) -> KeyFormat {
        self.format
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("format", &self.format)
            .field("der", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Packages, diffs and events
// ---------------------------------------------------------------------------

/// A leaf certificate, its chain as supplied by the source, and an optional
/// private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePackage {
    pub certificate: Certificate,
    pub chain: Vec<Certificate>,
    pub key: Option<PrivateKey>,
}

impl CertificatePackage {
    pub fn new(certificate: Certificate, chain: Vec<Certificate>, key: Option<PrivateKey>) -> Self {
        Self {
            certificate,
            chain,
            key,
        }
    }

    /// Package holding only a leaf certificate.
    pub fn leaf(certificate: Certificate) -> Self {
        Self::new(certificate, Vec::new(), None)
    }

    pub fn id(&self) -> &CertificateId {
        self.certificate.id()
    }
}

/// Packages added and removed during one reconciliation round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub added: Vec<CertificatePackage>,
    pub removed: Vec<CertificatePackage>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
    }
}

/// A non-empty [`Diff`] tagged with the name of the importer that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub source: String,
    pub diff: Diff,
}

impl ChangeEvent {
    pub fn new(source: impl Into<String>, diff: Diff) -> Self {
        Self {
            source: source.into(),
            diff,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
