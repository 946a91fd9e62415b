//! Error types for certsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while decoding certificate material.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The DER bytes are not a valid X.509 certificate.
    #[error("invalid certificate: {0}")]
    Certificate(String),

    /// The PEM text could not be decoded.
    #[error("invalid PEM: {0}")]
    Pem(#[from] std::io::Error),

    /// The PEM text held no certificate block.
    #[error("no certificate found in PEM input")]
    EmptyChain,

    /// The PEM text held no private key block.
    #[error("no private key found in PEM input")]
    MissingKey,

    /// A private key in an encoding certsync cannot carry.
    #[error("unsupported private key encoding")]
    UnsupportedKey,
}

/// Errors raised while loading or querying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error, with file path and serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML parse error for in-memory input.
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An option value referenced an unset environment variable.
    #[error("environment variable `{var}` referenced by option `{key}` is not set")]
    MissingEnv { key: String, var: String },

    /// A required adapter option was absent.
    #[error("cannot get key \"{0}\"")]
    MissingKey(String),

    /// An option value did not parse into the expected type.
    #[error("option `{key}` has invalid value `{value}`")]
    InvalidValue { key: String, value: String },

    /// The configuration is structurally valid YAML but semantically wrong.
    #[error("invalid config: {0}")]
    Invalid(String),
}
