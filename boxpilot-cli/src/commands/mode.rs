//! `boxpilot mode`: persist the proxy mode and rebuild the config for it.

use anyhow::Result;

use super::{finish, open_service};

pub async fn run(mode: &str) -> Result<()> {
    let service = open_service()?;
    finish(service.change_proxy_mode(mode).await)
}
