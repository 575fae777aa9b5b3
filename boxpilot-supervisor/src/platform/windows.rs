use std::net::SocketAddr;
use std::path::Path;

use super::{run_tool, tool, Platform};
use crate::error::{io_err, PlatformError};

const INTERNET_SETTINGS: &str =
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Internet Settings";
const TASK_NAME: &str = "boxpilot";
const PROXY_BYPASS: &str = "localhost;127.*;10.*;192.168.*;<local>";

/// WinINet registry proxy, Task Scheduler autostart, and UAC via PowerShell.
#[derive(Debug, Clone, Default)]
pub struct Windows;

impl Windows {
    pub fn new() -> Self {
        Self
    }
}

/// `schtasks` arguments creating a logon task for `exe run`.
pub fn autostart_task_args(exe: &Path) -> Vec<String> {
    vec![
        "/Create".to_string(),
        "/F".to_string(),
        "/SC".to_string(),
        "ONLOGON".to_string(),
        "/RL".to_string(),
        "HIGHEST".to_string(),
        "/TN".to_string(),
        TASK_NAME.to_string(),
        "/TR".to_string(),
        format!("\"{}\" run", exe.display()),
    ]
}

/// PowerShell command starting `exe args..` through the UAC prompt.
pub fn elevation_command(exe: &Path, args: &[String]) -> String {
    let quote = |s: &str| format!("'{}'", s.replace('\'', "''"));
    let mut command = format!("Start-Process -FilePath {} -Verb RunAs", quote(&exe.display().to_string()));
    if !args.is_empty() {
        let list: Vec<String> = args.iter().map(|a| quote(a)).collect();
        command.push_str(" -ArgumentList ");
        command.push_str(&list.join(","));
    }
    command
}

fn reg_set(name: &str, kind: &str, data: &str) -> Result<(), PlatformError> {
    run_tool(
        "reg",
        ["add", INTERNET_SETTINGS, "/v", name, "/t", kind, "/d", data, "/f"],
    )
    .map(|_| ())
}

impl Platform for Windows {
    fn set_system_proxy(&self, addr: SocketAddr) -> Result<(), PlatformError> {
        reg_set("ProxyServer", "REG_SZ", &addr.to_string())?;
        reg_set("ProxyOverride", "REG_SZ", PROXY_BYPASS)?;
        reg_set("ProxyEnable", "REG_DWORD", "1")?;
        tracing::info!(%addr, "system proxy enabled");
        Ok(())
    }

    fn clear_system_proxy(&self) -> Result<(), PlatformError> {
        reg_set("ProxyEnable", "REG_DWORD", "0")?;
        tracing::info!("system proxy cleared");
        Ok(())
    }

    /// `net session` only succeeds from an elevated token.
    fn is_elevated(&self) -> bool {
        run_tool("net", ["session"]).is_ok()
    }

    fn relaunch_elevated(&self, exe: &Path, args: &[String]) -> Result<(), PlatformError> {
        tool("powershell")
            .args(["-NoProfile", "-WindowStyle", "Hidden", "-Command"])
            .arg(elevation_command(exe, args))
            .spawn()
            .map_err(|e| io_err("powershell", e))?;
        Ok(())
    }

    fn register_autostart(&self, exe: &Path) -> Result<String, PlatformError> {
        run_tool("schtasks", autostart_task_args(exe))?;
        Ok(format!("scheduled task '{TASK_NAME}'"))
    }

    fn unregister_autostart(&self) -> Result<(), PlatformError> {
        run_tool("schtasks", ["/Delete", "/F", "/TN", TASK_NAME]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logon_task_runs_binary_with_run_subcommand() {
        let args = autostart_task_args(Path::new(r"C:\Program Files\boxpilot\boxpilot.exe"));
        assert_eq!(&args[2..4], ["/SC", "ONLOGON"]);
        assert_eq!(args.last().map(String::as_str), Some(r#""C:\Program Files\boxpilot\boxpilot.exe" run"#));
    }

    #[test]
    fn elevation_command_quotes_arguments() {
        let command = elevation_command(
            Path::new(r"C:\it's\boxpilot.exe"),
            &["mode".to_string(), "tun".to_string()],
        );
        assert_eq!(
            command,
            r"Start-Process -FilePath 'C:\it''s\boxpilot.exe' -Verb RunAs -ArgumentList 'mode','tun'"
        );
    }
}
