//! `boxpilot version|autostart|admin`: kernel identity and OS integration.

use anyhow::Result;
use clap::Subcommand;

use super::{finish, open_service};

#[derive(Subcommand, Debug)]
pub enum AutostartCommand {
    /// Launch `boxpilot run` at login.
    Enable,
    /// Remove the login entry.
    Disable,
}

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// Report whether this process has administrator rights.
    Status,
    /// Relaunch `boxpilot run` with administrator rights (needed for tun).
    Elevate,
}

pub async fn version() -> Result<()> {
    let service = open_service()?;
    finish(service.kernel_version().await)
}

pub async fn autostart(command: AutostartCommand) -> Result<()> {
    let service = open_service()?;
    match command {
        AutostartCommand::Enable => finish(service.set_auto_start().await),
        AutostartCommand::Disable => finish(service.remove_auto_start().await),
    }
}

pub async fn admin(command: AdminCommand) -> Result<()> {
    let service = open_service()?;
    match command {
        AdminCommand::Status => finish(service.is_admin().await),
        AdminCommand::Elevate => finish(service.restart_as_admin(&["run".to_string()]).await),
    }
}
