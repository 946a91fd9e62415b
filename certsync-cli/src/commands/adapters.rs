//! `certsync adapters`: built-in adapters and their options.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use certsync_adapters::default_registry;
use certsync_core::AdapterKind;
use certsync_daemon::AdapterInfo;

#[derive(Args, Debug)]
pub struct AdaptersArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct AdapterListing {
    name: String,
    kind: AdapterKind,
    options: Vec<OptionHelp>,
}

#[derive(Debug, Serialize)]
struct OptionHelp {
    key: String,
    help: String,
}

#[derive(Tabled)]
struct AdapterRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "options")]
    options: String,
}

impl AdaptersArgs {
    pub fn run(self) -> Result<()> {
        let registry = default_registry();
        let listings: Vec<AdapterListing> = registry
            .importer_infos()
            .into_iter()
            .map(|info| listing(info, AdapterKind::Importer))
            .chain(
                registry
                    .exporter_infos()
                    .into_iter()
                    .map(|info| listing(info, AdapterKind::Exporter)),
            )
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&listings)
                    .context("failed to render adapter list JSON")?
            );
            return Ok(());
        }

        println!("{}", "ADAPTERS".bold());
        let rows: Vec<AdapterRow> = listings
            .into_iter()
            .map(|listing| AdapterRow {
                name: listing.name,
                kind: listing.kind.to_string(),
                options: listing
                    .options
                    .iter()
                    .map(|option| format!("{}: {}", option.key, option.help))
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn listing(info: AdapterInfo, kind: AdapterKind) -> AdapterListing {
    AdapterListing {
        name: info.name,
        kind,
        options: info
            .config_help
            .into_iter()
            .map(|(key, help)| OptionHelp { key, help })
            .collect(),
    }
}
