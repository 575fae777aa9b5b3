//! `boxpilot kernel`: kernel binary management.

use anyhow::Result;
use clap::Subcommand;

use super::{finish, open_service};

#[derive(Subcommand, Debug)]
pub enum KernelCommand {
    /// Download the latest sing-box release for this machine.
    Download,
}

pub async fn run(command: KernelCommand) -> Result<()> {
    let service = open_service()?;
    match command {
        KernelCommand::Download => finish(service.download_latest_kernel().await),
    }
}
