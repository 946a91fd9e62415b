//! PEM decoding and encoding for certificate packages.
//!
//! Decoding goes through `rustls-pemfile`; encoding is plain RFC 7468 text
//! with 64-column base64 lines.

use std::io::BufReader;

use base64::Engine;
use rustls_pki_types::PrivateKeyDer;

use crate::error::CoreError;
use crate::types::{Certificate, CertificatePackage, KeyFormat, PrivateKey};

/// Decode every `CERTIFICATE` block in `pem`, in order of appearance.
pub fn parse_chain(pem: &str) -> Result<Vec<Certificate>, CoreError> {
    let mut reader = BufReader::new(pem.as_bytes());
    let mut chain = Vec::new();
    for der in rustls_pemfile::certs(&mut reader) {
        let der = der?;
        chain.push(Certificate::from_der(der.as_ref().to_vec())?);
    }
    if chain.is_empty() {
        return Err(CoreError::EmptyChain);
    }
    Ok(chain)
}

/// Decode the first private key block in `pem` (PKCS#1, PKCS#8 or SEC1).
pub fn parse_private_key(pem: &str) -> Result<PrivateKey, CoreError> {
    let mut reader = BufReader::new(pem.as_bytes());
    let key = rustls_pemfile::private_key(&mut reader)?.ok_or(CoreError::MissingKey)?;
    let key = match key {
        PrivateKeyDer::Pkcs1(der) => PrivateKey::new(KeyFormat::Pkcs1, der.secret_pkcs1_der()),
        PrivateKeyDer::Pkcs8(der) => PrivateKey::new(KeyFormat::Pkcs8, der.secret_pkcs8_der()),
        PrivateKeyDer::Sec1(der) => PrivateKey::new(KeyFormat::Sec1, der.secret_sec1_der()),
        _ => return Err(CoreError::UnsupportedKey),
    };
    Ok(key)
}

/// Build a package from a PEM chain (leaf first) and an optional PEM key.
pub fn parse_package(chain_pem: &str, key_pem: Option<&str>) -> Result<CertificatePackage, CoreError> {
    let chain = parse_chain(chain_pem)?;
    let key = key_pem.map(parse_private_key).transpose()?;
    let certificate = chain[0].clone();
    Ok(CertificatePackage::new(certificate, chain, key))
}

pub fn encode_certificate(cert: &Certificate) -> String {
    encode_block("CERTIFICATE", cert.der())
}

pub fn encode_private_key(key: &PrivateKey) -> String {
    encode_block(key.format().pem_label(), key.der())
}

/// Leaf followed by every chain certificate that is not the leaf itself.
pub fn encode_package_chain(package: &CertificatePackage) -> String {
    let mut out = encode_certificate(&package.certificate);
    for cert in &package.chain {
        if cert.same_content(&package.certificate) {
            continue;
        }
        out.push_str(&encode_certificate(cert));
    }
    out
}

fn encode_block(label: &str, der: &[u8]) -> String {
    let body = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    for line in body.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}
