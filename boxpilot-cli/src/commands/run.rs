//! `boxpilot run`: supervise the kernel in the foreground.
//!
//! Streams kernel logs (and optionally traffic) to stdout until ctrl-c or
//! until the kernel exits, then stops the kernel and restores the system
//! proxy.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use boxpilot_control::{LogEvent, LogLevel, TrafficSample};
use boxpilot_service::Service;

use super::finish;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Arguments for `boxpilot run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Switch to this proxy mode before starting.
    #[arg(long)]
    pub mode: Option<String>,

    /// Minimum kernel log level to stream.
    #[arg(long, default_value = "info")]
    pub level: LogLevel,

    /// Also print per-second traffic samples.
    #[arg(long)]
    pub traffic: bool,
}

impl RunArgs {
    pub async fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let service = Service::builder(&home)
            .log_level(self.level)
            .build()
            .context("failed to load boxpilot settings")?;

        if let Some(mode) = self.mode.as_deref() {
            finish(service.change_proxy_mode(mode).await)?;
        }

        let started = service.start_kernel().await;
        if !started.ok {
            bail!(started.message);
        }
        println!("{}", started.message.green().bold());

        let outcome = watch(&service, self.traffic).await;

        let stopped = service.shutdown().await;
        if !stopped.ok {
            warn!(message = %stopped.message, "shutdown incomplete");
        }
        outcome
    }
}

async fn watch(service: &Service, show_traffic: bool) -> Result<()> {
    let telemetry = service.telemetry().await;
    let mut logs = telemetry.as_ref().map(|t| t.subscribe_logs());
    let mut traffic = telemetry
        .as_ref()
        .filter(|_| show_traffic)
        .map(|t| t.subscribe_traffic());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut status = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("failed to listen for ctrl-c")?;
                info!("interrupted, stopping kernel");
                return Ok(());
            }
            event = recv(&mut logs) => match event {
                Ok(event) => print_log(&event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "log output fell behind"),
                Err(RecvError::Closed) => logs = None,
            },
            sample = recv(&mut traffic) => match sample {
                Ok(sample) => print_traffic(&sample),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => traffic = None,
            },
            _ = status.tick() => {
                let current = service.supervisor().status().await;
                if !current.is_running() {
                    bail!("kernel exited unexpectedly ({current})");
                }
            }
        }
    }
}

/// Next value from `rx`; never resolves once the channel is gone.
async fn recv<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>) -> Result<T, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn print_log(event: &LogEvent) {
    let level = match event.level.as_str() {
        "error" => event.level.red().bold(),
        "warn" | "warning" => event.level.yellow(),
        "debug" | "trace" => event.level.dimmed(),
        _ => event.level.normal(),
    };
    println!("{} {:>7} {}", timestamp(), level, event.payload);
}

fn print_traffic(sample: &TrafficSample) {
    println!(
        "{} {:>7} up {}/s  down {}/s",
        timestamp(),
        "traffic".cyan(),
        human_bytes(sample.up),
        human_bytes(sample.down)
    );
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string().dimmed().to_string()
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
