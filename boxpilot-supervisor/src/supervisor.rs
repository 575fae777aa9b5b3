use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{info, warn};

use boxpilot_control::{ControlClient, LogLevel, Readiness, Session, Telemetry};
use boxpilot_core::{KernelStatus, ProxyMode};

use crate::command::KernelCommand;
use crate::error::{io_err, PlatformError, SupervisorError};
use crate::platform::Platform;

/// Mixed inbound of the embedded template.
pub const DEFAULT_PROXY_ENDPOINT: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 2080));
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of [`Supervisor::restart_as_admin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationOutcome {
    /// Already elevated; nothing was done.
    AlreadyElevated,
    /// An elevated copy was launched; the caller should exit.
    Relaunched,
}

struct RunningKernel {
    child: Child,
    pid: u32,
    session: Option<Session>,
}

enum KernelState {
    Stopped,
    Running(RunningKernel),
}

struct Inner {
    kernel: KernelState,
    mode: ProxyMode,
}

/// Sole owner of the kernel process. Every lifecycle transition runs under
/// one lock, so two kernels never coexist and a stop is never doubled.
pub struct Supervisor {
    command: KernelCommand,
    platform: Arc<dyn Platform>,
    control: Option<ControlClient>,
    proxy: SocketAddr,
    readiness: Readiness,
    log_level: LogLevel,
    stop_timeout: Duration,
    inner: Mutex<Inner>,
}

impl Supervisor {
    pub fn new(command: KernelCommand, platform: Arc<dyn Platform>) -> Self {
        Self {
            command,
            platform,
            control: None,
            proxy: DEFAULT_PROXY_ENDPOINT,
            readiness: Readiness::default(),
            log_level: LogLevel::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            inner: Mutex::new(Inner {
                kernel: KernelState::Stopped,
                mode: ProxyMode::default(),
            }),
        }
    }

    /// Attach a telemetry session to every kernel this supervisor starts.
    pub fn with_control(mut self, client: ControlClient) -> Self {
        self.control = Some(client);
        self
    }

    pub fn with_proxy_endpoint(mut self, addr: SocketAddr) -> Self {
        self.proxy = addr;
        self
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_mode(mut self, mode: ProxyMode) -> Self {
        self.inner.get_mut().mode = mode;
        self
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the kernel. Returns its pid.
    pub async fn start(&self) -> Result<u32, SupervisorError> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await
    }

    /// Stop if running, then start; no other transition can interleave.
    pub async fn restart(&self) -> Result<u32, SupervisorError> {
        let mut inner = self.inner.lock().await;
        self.restart_locked(&mut inner).await
    }

    /// Switch between system proxy and tun. An unknown mode changes nothing.
    pub async fn change_mode(&self, raw: &str) -> Result<ProxyMode, SupervisorError> {
        let mode: ProxyMode = raw.parse()?;
        let mut inner = self.inner.lock().await;

        let proxy = self.proxy;
        self.on_platform(move |platform| platform.apply_mode(mode, proxy))
            .await?;
        inner.mode = mode;
        info!(mode = %mode, "proxy mode changed");

        if self.reap(&mut inner).await.is_some() {
            self.restart_locked(&mut inner).await?;
        }
        Ok(mode)
    }

    /// Relaunch the controlling process with administrator rights, stopping
    /// the kernel first. `args` are passed to the elevated copy.
    pub async fn restart_as_admin(
        &self,
        args: &[String],
    ) -> Result<ElevationOutcome, SupervisorError> {
        if self.is_elevated().await {
            return Ok(ElevationOutcome::AlreadyElevated);
        }

        {
            let mut inner = self.inner.lock().await;
            match self.stop_locked(&mut inner).await {
                Ok(()) | Err(SupervisorError::NotRunning) => {}
                Err(err) => warn!(error = %err, "failed to stop kernel before elevation"),
            }
        }

        let exe = std::env::current_exe().map_err(|e| SupervisorError::Elevation {
            source: io_err("current executable", e),
        })?;
        let (target, args) = (exe.clone(), args.to_vec());
        self.on_platform(move |platform| platform.relaunch_elevated(&target, &args))
            .await
            .map_err(|source| SupervisorError::Elevation { source })?;
        info!(exe = %exe.display(), "relaunched with administrator rights");
        Ok(ElevationOutcome::Relaunched)
    }

    /// Stop a running kernel before process exit.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        match self.stop().await {
            Ok(()) | Err(SupervisorError::NotRunning) => Ok(()),
            Err(err) => Err(err),
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// A kernel that exited on its own reads as stopped.
    pub async fn status(&self) -> KernelStatus {
        let mut inner = self.inner.lock().await;
        match self.reap(&mut inner).await {
            Some(pid) => KernelStatus::Running { pid },
            None => KernelStatus::Stopped,
        }
    }

    pub async fn mode(&self) -> ProxyMode {
        self.inner.lock().await.mode
    }

    /// Event streams of the running kernel, if one is running with a session.
    pub async fn telemetry(&self) -> Option<Telemetry> {
        let mut inner = self.inner.lock().await;
        self.reap(&mut inner).await?;
        match &inner.kernel {
            KernelState::Running(kernel) => kernel.session.as_ref().map(Session::telemetry),
            KernelState::Stopped => None,
        }
    }

    pub async fn is_elevated(&self) -> bool {
        self.on_platform(|platform| Ok(platform.is_elevated()))
            .await
            .unwrap_or(false)
    }

    pub async fn register_autostart(&self, exe: &Path) -> Result<String, SupervisorError> {
        let exe = exe.to_path_buf();
        Ok(self
            .on_platform(move |platform| platform.register_autostart(&exe))
            .await?)
    }

    pub async fn unregister_autostart(&self) -> Result<(), SupervisorError> {
        Ok(self
            .on_platform(|platform| platform.unregister_autostart())
            .await?)
    }

    // -----------------------------------------------------------------------
    // Locked transitions
    // -----------------------------------------------------------------------

    async fn start_locked(&self, inner: &mut Inner) -> Result<u32, SupervisorError> {
        if let Some(pid) = self.reap(inner).await {
            return Err(SupervisorError::AlreadyRunning { pid });
        }

        let child = self.command.spawn()?;
        let pid = child.id().unwrap_or_default();
        let session = self
            .control
            .clone()
            .map(|client| Session::open(client, self.readiness, self.log_level));
        inner.kernel = KernelState::Running(RunningKernel {
            child,
            pid,
            session,
        });
        info!(pid, program = %self.command.display(), mode = %inner.mode, "kernel started");

        // A preceding stop cleared the system proxy.
        if inner.mode == ProxyMode::System {
            let proxy = self.proxy;
            if let Err(err) = self
                .on_platform(move |platform| platform.set_system_proxy(proxy))
                .await
            {
                warn!(error = %err, "failed to set system proxy");
            }
        }
        Ok(pid)
    }

    async fn stop_locked(&self, inner: &mut Inner) -> Result<(), SupervisorError> {
        self.reap(inner).await.ok_or(SupervisorError::NotRunning)?;
        let KernelState::Running(mut kernel) =
            std::mem::replace(&mut inner.kernel, KernelState::Stopped)
        else {
            return Err(SupervisorError::NotRunning);
        };

        drop(kernel.session.take());
        if let Err(err) = kernel.child.start_kill() {
            warn!(pid = kernel.pid, error = %err, "failed to signal kernel");
        }
        match tokio::time::timeout(self.stop_timeout, kernel.child.wait()).await {
            Ok(Ok(status)) => info!(pid = kernel.pid, %status, "kernel stopped"),
            Ok(Err(err)) => warn!(pid = kernel.pid, error = %err, "failed to reap kernel"),
            Err(_) => warn!(
                pid = kernel.pid,
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "kernel did not exit in time"
            ),
        }

        self.clear_system_proxy().await;
        Ok(())
    }

    async fn restart_locked(&self, inner: &mut Inner) -> Result<u32, SupervisorError> {
        match self.stop_locked(inner).await {
            Ok(()) | Err(SupervisorError::NotRunning) => {}
            Err(err) => return Err(err),
        }
        self.start_locked(inner).await
    }

    /// Pid of a live kernel. A kernel that already exited is reaped, the
    /// state reset to stopped, and the system proxy it served cleared.
    async fn reap(&self, inner: &mut Inner) -> Option<u32> {
        match reap_child(&mut inner.kernel) {
            Liveness::Running(pid) => Some(pid),
            Liveness::Stopped => None,
            Liveness::Exited => {
                self.clear_system_proxy().await;
                None
            }
        }
    }

    async fn clear_system_proxy(&self) {
        if !self.platform.system_proxy_is_distinct() {
            return;
        }
        if let Err(err) = self
            .on_platform(|platform| platform.clear_system_proxy())
            .await
        {
            warn!(error = %err, "failed to clear system proxy");
        }
    }

    /// OS tools block; run them on the blocking pool.
    async fn on_platform<T, F>(&self, call: F) -> Result<T, PlatformError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Platform) -> Result<T, PlatformError> + Send + 'static,
    {
        let platform = Arc::clone(&self.platform);
        tokio::task::spawn_blocking(move || call(platform.as_ref()))
            .await
            .map_err(|err| PlatformError::Interrupted(err.to_string()))?
    }
}

enum Liveness {
    Running(u32),
    Stopped,
    Exited,
}

fn reap_child(state: &mut KernelState) -> Liveness {
    match state {
        KernelState::Stopped => return Liveness::Stopped,
        KernelState::Running(kernel) => match kernel.child.try_wait() {
            Ok(None) => return Liveness::Running(kernel.pid),
            Ok(Some(status)) => warn!(pid = kernel.pid, %status, "kernel exited unexpectedly"),
            Err(err) => warn!(pid = kernel.pid, error = %err, "kernel state unknown; treating as exited"),
        },
    }
    *state = KernelState::Stopped;
    Liveness::Exited
}
