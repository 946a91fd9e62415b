//! certsync core library: certificate domain types, PEM codec, configuration.
//!
//! - [`types`]: certificates, packages, diffs and change events
//! - [`pem`]: PEM decode/encode for packages
//! - [`config`]: [`Config`] and per-adapter [`AdapterOptions`]
//! - [`error`]: [`CoreError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod pem;
pub mod types;

pub use config::{AdapterKind, AdapterOptions, Config, HubConfig};
pub use error::{ConfigError, CoreError};
pub use types::{
    Certificate, CertificateId, CertificatePackage, ChangeEvent, Diff, KeyFormat, PrivateKey,
};
