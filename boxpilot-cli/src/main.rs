//! boxpilot: sing-box kernel manager.
//!
//! # Usage
//!
//! ```text
//! boxpilot kernel download
//! boxpilot subscription apply [URL]
//! boxpilot mode <system|tun>
//! boxpilot run [--mode system|tun] [--level info] [--traffic]
//! boxpilot version
//! boxpilot proxies list [--json]
//! boxpilot proxies switch <GROUP> <NAME>
//! boxpilot autostart enable|disable
//! boxpilot admin status|elevate
//! ```

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    kernel::KernelCommand, proxies::ProxiesCommand, run::RunArgs,
    subscription::SubscriptionCommand, system::{AdminCommand, AutostartCommand},
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "boxpilot",
    version,
    about = "Download, configure and supervise a local sing-box proxy kernel",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the kernel binary.
    Kernel {
        #[command(subcommand)]
        command: KernelCommand,
    },

    /// Fetch a subscription and rebuild the kernel config.
    Subscription {
        #[command(subcommand)]
        command: SubscriptionCommand,
    },

    /// Switch between system proxy and tun mode.
    Mode {
        /// `system` or `tun`.
        mode: String,
    },

    /// Run the kernel in the foreground until ctrl-c.
    Run(RunArgs),

    /// Print the running kernel's version.
    Version,

    /// Inspect and switch routing groups of the running kernel.
    Proxies {
        #[command(subcommand)]
        command: ProxiesCommand,
    },

    /// Start boxpilot at login.
    Autostart {
        #[command(subcommand)]
        command: AutostartCommand,
    },

    /// Check or acquire administrator rights.
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Commands::Run(_)));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Kernel { command } => commands::kernel::run(command).await,
            Commands::Subscription { command } => commands::subscription::run(command).await,
            Commands::Mode { mode } => commands::mode::run(&mode).await,
            Commands::Run(args) => args.run().await,
            Commands::Version => commands::system::version().await,
            Commands::Proxies { command } => commands::proxies::run(command).await,
            Commands::Autostart { command } => commands::system::autostart(command).await,
            Commands::Admin { command } => commands::system::admin(command).await,
        }
    })
}

/// Logs go to stderr; `RUST_LOG` overrides the default level.
fn init_tracing(foreground: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if foreground { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
