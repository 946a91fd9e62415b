//! `certsync check-config`: validate a configuration without starting anything.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use certsync_adapters::default_registry;
use certsync_core::Config;

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Path to the YAML configuration file.
    #[arg(long, short)]
    pub config: PathBuf,
}

impl CheckConfigArgs {
    pub fn run(self) -> Result<()> {
        let config = Config::load(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;

        // Configuring is side-effect free; nothing is started.
        let adapters = default_registry()
            .configure(&config)
            .context("configuration leaves nothing to run")?;

        let importers = adapters.importer_names();
        let exporters = adapters.exporter_names();
        for name in config
            .importers
            .iter()
            .filter(|name| !importers.iter().any(|i| i.eq_ignore_ascii_case(name)))
            .chain(
                config
                    .exporters
                    .iter()
                    .filter(|name| !exporters.iter().any(|e| e.eq_ignore_ascii_case(name))),
            )
        {
            println!("{} {name} will not run", "warning:".yellow().bold());
        }

        println!("{} {}", "config ok:".green().bold(), self.config.display());
        println!("importers: {}", importers.join(", "));
        println!("exporters: {}", exporters.join(", "));
        println!(
            "hub: inbound capacity {}, subscriber capacity {}",
            config.hub.inbound_capacity, config.hub.subscriber_capacity
        );
        println!(
            "restart delay {} ms, shutdown grace {} ms",
            config.restart_delay_ms, config.shutdown_grace_ms
        );
        Ok(())
    }
}
