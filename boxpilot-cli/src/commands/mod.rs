pub mod kernel;
pub mod mode;
pub mod proxies;
pub mod run;
pub mod subscription;
pub mod system;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use boxpilot_service::{Report, Service};

/// Service rooted at the user's home directory.
pub fn open_service() -> Result<Service> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Service::open(&home).context("failed to load boxpilot settings")
}

/// Print a successful report, or turn a failed one into the command's error.
pub fn finish(report: Report) -> Result<()> {
    if !report.ok {
        bail!(report.message);
    }
    println!("{}", report.message.green());
    Ok(())
}
