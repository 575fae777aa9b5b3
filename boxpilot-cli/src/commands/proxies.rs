//! `boxpilot proxies`: routing groups of the running kernel.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use boxpilot_control::ProxyListing;

use super::{finish, open_service};

#[derive(Subcommand, Debug)]
pub enum ProxiesCommand {
    /// List routing groups and their current selection.
    List {
        /// Emit the raw listing as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Select `name` inside routing group `group`.
    Switch { group: String, name: String },
}

pub async fn run(command: ProxiesCommand) -> Result<()> {
    let service = open_service()?;
    match command {
        ProxiesCommand::List { json } => {
            let report = service.proxies().await;
            if !report.ok {
                bail!(report.message);
            }
            let data = report.data.unwrap_or_default();
            if json {
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }
            let listing: ProxyListing =
                serde_json::from_value(data).context("unexpected proxy listing shape")?;
            print_table(&listing);
            Ok(())
        }
        ProxiesCommand::Switch { group, name } => {
            finish(service.switch_proxy(&group, &name).await)
        }
    }
}

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "group")]
    group: String,
    #[tabled(rename = "type")]
    kind: String,
    #[tabled(rename = "selected")]
    selected: String,
    #[tabled(rename = "delay")]
    delay: String,
    #[tabled(rename = "members")]
    members: usize,
}

fn rows(listing: &ProxyListing) -> Vec<GroupRow> {
    listing
        .groups()
        .map(|(name, entry)| {
            let selected = entry.now.clone().unwrap_or_else(|| "-".to_string());
            let delay = entry
                .now
                .as_deref()
                .and_then(|now| listing.get(now))
                .and_then(|member| member.last_delay())
                .map(|ms| if ms == 0 { "timeout".to_string() } else { format!("{ms} ms") })
                .unwrap_or_else(|| "-".to_string());
            GroupRow {
                group: name.to_string(),
                kind: entry.kind.clone(),
                selected,
                delay,
                members: entry.all.as_ref().map_or(0, Vec::len),
            }
        })
        .collect()
}

fn print_table(listing: &ProxyListing) {
    let rows = rows(listing);
    if rows.is_empty() {
        println!("No routing groups reported by the kernel.");
        return;
    }
    println!("{}", format!("{} routing groups", rows.len()).bold());
    println!("{}", Table::new(rows).with(Style::rounded()));
}
