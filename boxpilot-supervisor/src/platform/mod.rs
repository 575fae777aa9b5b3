//! OS integration: system proxy, elevation, and login-time autostart.
//!
//! Every backend compiles on every target (they only shell out to the OS's
//! own tools); [`native`] picks the one for the running OS.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use boxpilot_core::ProxyMode;

use crate::error::{io_err, PlatformError};

pub mod linux;
pub mod macos;
pub mod windows;

/// Capabilities the supervisor needs from the host OS.
pub trait Platform: Send + Sync {
    /// Point the OS-wide HTTP/HTTPS/SOCKS proxy at `addr`.
    fn set_system_proxy(&self, addr: SocketAddr) -> Result<(), PlatformError>;

    fn clear_system_proxy(&self) -> Result<(), PlatformError>;

    /// Whether the system proxy is an OS setting that outlives the kernel
    /// and therefore has to be cleared on stop.
    fn system_proxy_is_distinct(&self) -> bool {
        true
    }

    /// `system` points the OS at `proxy`; `tun` removes a stale system proxy.
    fn apply_mode(&self, mode: ProxyMode, proxy: SocketAddr) -> Result<(), PlatformError> {
        match mode {
            ProxyMode::System => self.set_system_proxy(proxy),
            ProxyMode::Tun if self.system_proxy_is_distinct() => self.clear_system_proxy(),
            ProxyMode::Tun => Ok(()),
        }
    }

    fn is_elevated(&self) -> bool;

    /// Start `exe args..` again with administrator rights. Returns once the
    /// elevated process has been launched.
    fn relaunch_elevated(&self, exe: &Path, args: &[String]) -> Result<(), PlatformError>;

    /// Run `exe run` at login. Returns where the entry was registered.
    fn register_autostart(&self, exe: &Path) -> Result<String, PlatformError>;

    fn unregister_autostart(&self) -> Result<(), PlatformError>;
}

/// Backend for the OS this binary was built for.
#[cfg(target_os = "macos")]
pub fn native(home: &Path) -> Arc<dyn Platform> {
    Arc::new(macos::MacOs::new(home))
}

#[cfg(windows)]
pub fn native(_home: &Path) -> Arc<dyn Platform> {
    Arc::new(windows::Windows::new())
}

#[cfg(not(any(target_os = "macos", windows)))]
pub fn native(home: &Path) -> Arc<dyn Platform> {
    Arc::new(linux::Linux::new(home))
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// `Command` that never flashes a console window on Windows.
pub(crate) fn tool(program: &str) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(crate::command::CREATE_NO_WINDOW);
    }
    cmd
}

/// Run `program args..` to completion and return its trimmed stdout.
pub(crate) fn run_tool<I, S>(program: &str, args: I) -> Result<String, PlatformError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = tool(program)
        .args(args)
        .output()
        .map_err(|e| io_err(program, e))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Err(PlatformError::Command {
        tool: program.to_string(),
        status: output.status.to_string(),
        detail: format!("{stdout} {stderr}").trim().to_string(),
    })
}

/// Same as [`run_tool`], but a non-zero exit is only logged.
pub(crate) fn run_tool_lenient<I, S>(program: &str, args: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    if let Err(err) = run_tool(program, args) {
        tracing::debug!(error = %err, "ignored tool failure");
    }
}

/// Numeric uid of the current user via `id -u`.
pub(crate) fn current_uid() -> Result<String, PlatformError> {
    let uid = run_tool("id", ["-u"])?;
    if uid.is_empty() {
        return Err(PlatformError::Command {
            tool: "id -u".to_string(),
            status: "0".to_string(),
            detail: "current uid was empty".to_string(),
        });
    }
    Ok(uid)
}

/// Write `content` to `path`, creating parent directories.
pub(crate) fn write_entry(path: &Path, content: &str) -> Result<PathBuf, PlatformError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| io_err(path, e))?;
    Ok(path.to_path_buf())
}

/// Single-quote `arg` for a POSIX shell.
pub(crate) fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r#"'\''"#))
}
