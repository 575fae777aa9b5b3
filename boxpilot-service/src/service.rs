//! The facade every front end talks to. Each operation returns a [`Report`];
//! causes are logged, never propagated as panics or exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use boxpilot_control::{ControlClient, LogLevel, Readiness, Telemetry, DEFAULT_CONTROLLER};
use boxpilot_core::{paths, settings, HostTarget, ProxyMode, Settings};
use boxpilot_supervisor::{
    native_platform, ElevationOutcome, KernelCommand, Platform, Supervisor,
    DEFAULT_PROXY_ENDPOINT,
};
use boxpilot_synth::{pipeline, writer, SynthError, SynthOptions, Template};

use crate::error::ServiceError;
use crate::release::{self, Unpacker, ZipUnpacker};
use crate::report::Report;

const USER_AGENT: &str = concat!("boxpilot/", env!("CARGO_PKG_VERSION"));

/// Put `path` back to `previous`, or remove it when it did not exist.
fn restore(path: &Path, previous: Option<&[u8]>) {
    let outcome = match previous {
        Some(bytes) => writer::atomic_write(path, bytes).map_err(|e| e.to_string()),
        None => match std::fs::remove_file(path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.to_string()),
            _ => Ok(()),
        },
    };
    if let Err(err) = outcome {
        warn!(path = %path.display(), error = %err, "failed to roll back");
    }
}

/// Log `err` and turn it into a failed report.
fn failure(context: &str, err: &dyn std::error::Error) -> Report {
    error!(error = %err, "{context}");
    Report::error(format!("{context}: {err}"))
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Service`]; defaults target the running OS and the installed
/// kernel under `home`.
pub struct ServiceBuilder {
    home: PathBuf,
    settings: Option<Settings>,
    platform: Option<Arc<dyn Platform>>,
    command: Option<KernelCommand>,
    unpacker: Option<Arc<dyn Unpacker>>,
    host: HostTarget,
    log_level: LogLevel,
}

impl ServiceBuilder {
    pub fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            settings: None,
            platform: None,
            command: None,
            unpacker: None,
            host: HostTarget::current(),
            log_level: LogLevel::default(),
        }
    }

    /// Use these settings instead of loading `settings.yaml`.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn command(mut self, command: KernelCommand) -> Self {
        self.command = Some(command);
        self
    }

    pub fn unpacker(mut self, unpacker: Arc<dyn Unpacker>) -> Self {
        self.unpacker = Some(unpacker);
        self
    }

    pub fn host_target(mut self, host: HostTarget) -> Self {
        self.host = host;
        self
    }

    /// Minimum level of the kernel log stream.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn build(self) -> Result<Service, ServiceError> {
        let settings = match self.settings {
            Some(settings) => settings,
            None => settings::load_at(&self.home)?,
        };
        let template = Template::load(settings.template_path.as_deref())?;

        let config = template.config();
        let controller = settings
            .controller
            .clone()
            .or_else(|| config.controller_addr().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_CONTROLLER.to_string());
        let control = ControlClient::new(
            &controller,
            config.controller_secret().map(str::to_string),
        )?;
        let proxy = config.proxy_listen().unwrap_or(DEFAULT_PROXY_ENDPOINT);

        let platform = self
            .platform
            .unwrap_or_else(|| native_platform(&self.home));
        let command = self
            .command
            .unwrap_or_else(|| KernelCommand::sing_box(&self.home));
        let supervisor = Supervisor::new(command, platform)
            .with_control(control.clone())
            .with_proxy_endpoint(proxy)
            .with_readiness(Readiness {
                attempts: settings.readiness_attempts,
                interval: settings.readiness_interval(),
            })
            .with_stop_timeout(settings.stop_timeout())
            .with_log_level(self.log_level)
            .with_mode(settings.mode);

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(ServiceError::Http)?;

        info!(controller = %controller, proxy = %proxy, mode = %settings.mode, "service ready");
        Ok(Service {
            home: self.home,
            settings: Mutex::new(settings),
            template,
            supervisor,
            control,
            http,
            unpacker: self
                .unpacker
                .unwrap_or_else(|| Arc::new(ZipUnpacker)),
            host: self.host,
        })
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct Service {
    home: PathBuf,
    settings: Mutex<Settings>,
    template: Template,
    supervisor: Supervisor,
    control: ControlClient,
    http: reqwest::Client,
    unpacker: Arc<dyn Unpacker>,
    host: HostTarget,
}

impl Service {
    pub fn builder(home: &Path) -> ServiceBuilder {
        ServiceBuilder::new(home)
    }

    /// Service for `home` with OS defaults.
    pub fn open(home: &Path) -> Result<Self, ServiceError> {
        ServiceBuilder::new(home).build()
    }

    pub async fn settings(&self) -> Settings {
        self.settings.lock().await.clone()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    // -----------------------------------------------------------------------
    // Kernel binary and configuration
    // -----------------------------------------------------------------------

    pub async fn download_latest_kernel(&self) -> Report {
        let api = self.settings.lock().await.release_api.clone();
        match release::install_latest(&self.http, &api, &self.host, &self.home, self.unpacker.clone())
            .await
        {
            Ok(installed) => Report::ok(format!(
                "installed kernel {} at {}",
                installed.tag,
                installed.path.display()
            ))
            .with_data(installed),
            Err(err) => failure("failed to download the latest kernel", &err),
        }
    }

    /// Fetch the subscription at `url` (or the remembered one), rebuild the
    /// kernel config for the current mode, and restart a running kernel.
    pub async fn download_subscription(&self, url: Option<&str>) -> Report {
        let mut settings = self.settings.lock().await;
        let Some(url) = url
            .map(str::to_string)
            .or_else(|| settings.subscription_url.clone())
        else {
            return Report::error("no subscription URL given and none remembered");
        };

        let document = match pipeline::fetch_subscription(&self.http, &url).await {
            Ok(document) => document,
            Err(err) => return failure("failed to download subscription", &err),
        };
        let synthesis = match self
            .template
            .synthesize(&document, &SynthOptions::for_mode(settings.mode))
        {
            Ok(synthesis) => synthesis,
            Err(err) => return failure("failed to build kernel config", &err),
        };
        if synthesis.appended.is_empty() {
            warn!(url = %url, skipped = synthesis.skipped, "subscription has no usable endpoints");
            return Report::error(
                "subscription contains no usable endpoints; kernel config left unchanged",
            );
        }
        if let Err(err) = self.persist_subscription(&document, &synthesis.document) {
            return failure("failed to save subscription", &err);
        }

        settings.subscription_url = Some(url.clone());
        if let Err(err) = settings::save_at(&self.home, &settings) {
            return failure("failed to save settings", &err);
        }
        drop(settings);

        if self.supervisor.status().await.is_running() {
            if let Err(err) = self.supervisor.restart().await {
                return failure("subscription applied but kernel restart failed", &err);
            }
        }

        info!(url = %url, endpoints = synthesis.appended.len(), skipped = synthesis.skipped, "subscription applied");
        Report::ok(format!(
            "subscription applied: {} endpoints ({} skipped)",
            synthesis.appended.len(),
            synthesis.skipped
        ))
        .with_data(json!({
            "endpoints": synthesis.appended,
            "skipped": synthesis.skipped,
        }))
    }

    /// Switch proxy mode. An unknown mode is rejected before anything
    /// changes; a mode the OS refuses leaves config and settings as they were.
    pub async fn change_proxy_mode(&self, raw: &str) -> Report {
        let mode: ProxyMode = match raw.parse() {
            Ok(mode) => mode,
            Err(err) => return failure("cannot change proxy mode", &err),
        };
        let mut settings = self.settings.lock().await;

        let config = paths::kernel_config(&self.home);
        let cache = paths::subscription_cache(&self.home);
        let rebuilt = if cache.exists() {
            let document = match std::fs::read(&cache) {
                Ok(document) => document,
                Err(err) => return failure("failed to read cached subscription", &err),
            };
            match self.template.synthesize(&document, &SynthOptions::for_mode(mode)) {
                Ok(synthesis) => Some(synthesis.document),
                Err(err) => return failure("failed to rebuild kernel config", &err),
            }
        } else {
            None
        };

        // The kernel restarted by the supervisor must read the new config.
        let previous = match &rebuilt {
            Some(document) => {
                let previous = std::fs::read(&config).ok();
                if let Err(err) = writer::atomic_write(&config, document) {
                    return failure("failed to write kernel config", &err);
                }
                Some(previous)
            }
            None => None,
        };

        if let Err(err) = self.supervisor.change_mode(mode.as_str()).await {
            // A failed restart after the switch still leaves the new mode live.
            if self.supervisor.mode().await != mode {
                if let Some(previous) = previous {
                    restore(&config, previous.as_deref());
                }
                return failure("failed to apply proxy mode", &err);
            }
            settings.mode = mode;
            if let Err(save) = settings::save_at(&self.home, &settings) {
                warn!(error = %save, "failed to save settings");
            }
            return failure("proxy mode applied but kernel restart failed", &err);
        }

        settings.mode = mode;
        if let Err(err) = settings::save_at(&self.home, &settings) {
            return failure("failed to save settings", &err);
        }
        Report::ok(format!("proxy mode set to {mode}")).with_data(json!({ "mode": mode }))
    }

    /// Cache `document` and write `config`; on failure neither changes.
    fn persist_subscription(&self, document: &[u8], config: &[u8]) -> Result<(), SynthError> {
        let cache = paths::subscription_cache(&self.home);
        let config_path = paths::kernel_config(&self.home);
        let previous = std::fs::read(&cache).ok();

        writer::atomic_write(&cache, document)?;
        if let Err(err) = writer::atomic_write(&config_path, config) {
            restore(&cache, previous.as_deref());
            return Err(err);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub async fn start_kernel(&self) -> Report {
        if !paths::kernel_config(&self.home).exists() {
            return Report::error("no kernel config yet; apply a subscription first");
        }
        match self.supervisor.start().await {
            Ok(pid) => Report::ok(format!("kernel started (pid {pid})")).with_data(json!({ "pid": pid })),
            Err(err) => failure("failed to start kernel", &err),
        }
    }

    pub async fn stop_kernel(&self) -> Report {
        match self.supervisor.stop().await {
            Ok(()) => Report::ok("kernel stopped"),
            Err(err) => failure("failed to stop kernel", &err),
        }
    }

    pub async fn restart_kernel(&self) -> Report {
        match self.supervisor.restart().await {
            Ok(pid) => Report::ok(format!("kernel restarted (pid {pid})")).with_data(json!({ "pid": pid })),
            Err(err) => failure("failed to restart kernel", &err),
        }
    }

    pub async fn kernel_status(&self) -> Report {
        let status = self.supervisor.status().await;
        Report::ok(format!("kernel {status}")).with_data(status)
    }

    /// Stop a running kernel before the process exits.
    pub async fn shutdown(&self) -> Report {
        match self.supervisor.shutdown().await {
            Ok(()) => Report::ok("shut down"),
            Err(err) => failure("failed to shut down kernel", &err),
        }
    }

    pub async fn telemetry(&self) -> Option<Telemetry> {
        self.supervisor.telemetry().await
    }

    // -----------------------------------------------------------------------
    // Control API
    // -----------------------------------------------------------------------

    pub async fn kernel_version(&self) -> Report {
        match self.control.version().await {
            Ok(version) => Report::ok(version.clone()).with_data(json!({ "version": version })),
            Err(err) => failure("failed to query kernel version", &err),
        }
    }

    pub async fn proxies(&self) -> Report {
        match self.control.proxies().await {
            Ok(listing) => {
                let groups = listing.groups().count();
                Report::ok(format!("{groups} routing groups")).with_data(listing)
            }
            Err(err) => failure("failed to list proxies", &err),
        }
    }

    pub async fn switch_proxy(&self, group: &str, name: &str) -> Report {
        match self.control.switch_proxy(group, name).await {
            Ok(()) => Report::ok(format!("'{group}' now uses '{name}'")),
            Err(err) => failure("failed to switch proxy", &err),
        }
    }

    // -----------------------------------------------------------------------
    // OS integration
    // -----------------------------------------------------------------------

    pub async fn set_auto_start(&self) -> Report {
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(err) => return failure("cannot locate the running executable", &err),
        };
        match self.supervisor.register_autostart(&exe).await {
            Ok(location) => Report::ok(format!("autostart enabled ({location})"))
                .with_data(json!({ "location": location })),
            Err(err) => failure("failed to enable autostart", &err),
        }
    }

    pub async fn remove_auto_start(&self) -> Report {
        match self.supervisor.unregister_autostart().await {
            Ok(()) => Report::ok("autostart disabled"),
            Err(err) => failure("failed to disable autostart", &err),
        }
    }

    pub async fn is_admin(&self) -> Report {
        let admin = self.supervisor.is_elevated().await;
        let message = if admin {
            "running with administrator rights"
        } else {
            "running without administrator rights"
        };
        Report::ok(message).with_data(json!({ "admin": admin }))
    }

    /// `args` are handed to the elevated copy of this program.
    pub async fn restart_as_admin(&self, args: &[String]) -> Report {
        match self.supervisor.restart_as_admin(args).await {
            Ok(ElevationOutcome::AlreadyElevated) => {
                Report::ok("already running with administrator rights")
                    .with_data(json!({ "relaunched": false }))
            }
            Ok(ElevationOutcome::Relaunched) => {
                Report::ok("relaunched with administrator rights")
                    .with_data(json!({ "relaunched": true }))
            }
            Err(err) => failure("failed to restart with administrator rights", &err),
        }
    }
}
