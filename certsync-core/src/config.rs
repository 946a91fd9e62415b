//! Process configuration: which adapters run and their options.
//!
//! # File format
//!
//! ```yaml
//! importers: [vault]
//! exporters: [stdout, traefik]
//! importer_options:
//!   vault: { addr: "https://vault:8200", token: "${VAULT_TOKEN}" }
//! exporter_options:
//!   traefik: { base_location: "/etc/traefik/certs" }
//! hub: { inbound_capacity: 10, subscriber_capacity: 5 }
//! restart_delay_ms: 1000
//! shutdown_grace_ms: 5000
//! ```
//!
//! `${NAME}` inside an option value is replaced by the environment variable
//! `NAME` when the file is loaded.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_INBOUND_CAPACITY: usize = 10;
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 5;
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1_000;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Whether an adapter produces certificates or consumes change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Importer,
    Exporter,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterKind::Importer => write!(f, "importer"),
            AdapterKind::Exporter => write!(f, "exporter"),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter options
// ---------------------------------------------------------------------------

/// Per-adapter key/value options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterOptions(pub BTreeMap<String, String>);

impl AdapterOptions {
    /// Value for `key`, or `default` when absent.
    pub fn get<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.0.get(key).map(String::as_str).unwrap_or(default)
    }

    /// Value for `key`, failing with [`ConfigError::MissingKey`] when absent.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.0
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingKey(key.to_owned()))
    }

    /// Parse the value for `key`, or return `default` when absent.
    pub fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_owned(),
                value: value.clone(),
            }),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    fn expand_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (key, value) in self.0.iter_mut() {
            *value = expand_value(key, value, lookup)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AdapterOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn expand_value<F>(key: &str, value: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let var = &rest[start + 2..start + 2 + len];
        let resolved = lookup(var).ok_or_else(|| ConfigError::MissingEnv {
            key: key.to_owned(),
            var: var.to_owned(),
        })?;
        out.push_str(&rest[..start]);
        out.push_str(&resolved);
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Queue capacities for the broadcast hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

fn default_inbound_capacity() -> usize {
    DEFAULT_INBOUND_CAPACITY
}

fn default_subscriber_capacity() -> usize {
    DEFAULT_SUBSCRIBER_CAPACITY
}

fn default_restart_delay_ms() -> u64 {
    DEFAULT_RESTART_DELAY_MS
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

/// Root of the certsync YAML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Allow-list of importer names (case-insensitive).
    #[serde(default)]
    pub importers: Vec<String>,
    /// Allow-list of exporter names (case-insensitive).
    #[serde(default)]
    pub exporters: Vec<String>,
    #[serde(default)]
    pub importer_options: BTreeMap<String, AdapterOptions>,
    #[serde(default)]
    pub exporter_options: BTreeMap<String, AdapterOptions>,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            importers: Vec::new(),
            exporters: Vec::new(),
            importer_options: BTreeMap::new(),
            exporter_options: BTreeMap::new(),
            hub: HubConfig::default(),
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl Config {
    /// Load and validate the configuration file at `path`, expanding
    /// `${NAME}` references from the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.finish(&|var| std::env::var(var).ok())
    }

    /// Parse YAML text, resolving `${NAME}` references through `lookup`.
    pub fn from_yaml_with_env<F>(yaml: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.finish(&lookup)
    }

    fn finish<F>(mut self, lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for options in self
            .importer_options
            .values_mut()
            .chain(self.exporter_options.values_mut())
        {
            options.expand_env(lookup)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.inbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.inbound_capacity must be at least 1".to_string(),
            ));
        }
        if self.hub.subscriber_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.subscriber_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `name` is on the allow-list for `kind`.
    pub fn is_enabled(&self, kind: AdapterKind, name: &str) -> bool {
        let list = match kind {
            AdapterKind::Importer => &self.importers,
            AdapterKind::Exporter => &self.exporters,
        };
        list.iter().any(|enabled| enabled.eq_ignore_ascii_case(name))
    }

    /// Options for adapter `name`, empty when none are configured.
    pub fn options_for(&self, kind: AdapterKind, name: &str) -> AdapterOptions {
        let map = match kind {
            AdapterKind::Importer => &self.importer_options,
            AdapterKind::Exporter => &self.exporter_options,
        };
        map.get(name)
            .or_else(|| {
                map.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, options)| options)
            })
            .cloned()
            .unwrap_or_default()
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
