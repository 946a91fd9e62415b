//! `certsync run`: foreground daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use certsync_adapters::default_registry;
use certsync_core::Config;
use certsync_daemon::{start_blocking, LogFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the YAML configuration file.
    #[arg(long, short)]
    pub config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let config = Config::load(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        let format = if self.log_json {
            LogFormat::Json
        } else {
            LogFormat::Text
        };
        start_blocking(config, default_registry(), format).context("daemon exited with error")?;
        Ok(())
    }
}
