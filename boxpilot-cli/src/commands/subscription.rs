//! `boxpilot subscription`: fetch a subscription and rebuild the config.

use anyhow::Result;
use clap::Subcommand;

use super::{finish, open_service};

#[derive(Subcommand, Debug)]
pub enum SubscriptionCommand {
    /// Download the subscription and write the kernel config.
    Apply {
        /// Subscription URL. Defaults to the last one applied.
        url: Option<String>,
    },
}

pub async fn run(command: SubscriptionCommand) -> Result<()> {
    let service = open_service()?;
    match command {
        SubscriptionCommand::Apply { url } => {
            finish(service.download_subscription(url.as_deref()).await)
        }
    }
}
