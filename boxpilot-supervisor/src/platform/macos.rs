use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use boxpilot_core::paths::AUTOSTART_LABEL;

use super::{current_uid, run_tool, run_tool_lenient, shell_quote, tool, write_entry, Platform};
use crate::error::{io_err, PlatformError};

/// `networksetup` for the proxy, launchd for autostart, `osascript` for
/// elevation.
#[derive(Debug, Clone)]
pub struct MacOs {
    home: PathBuf,
}

impl MacOs {
    pub fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
        }
    }

    fn plist_path(&self) -> PathBuf {
        self.home
            .join("Library")
            .join("LaunchAgents")
            .join(format!("{AUTOSTART_LABEL}.plist"))
    }
}

/// Generate the launchd agent plist that runs `binary run` at login.
pub fn generate_plist(binary: &Path) -> String {
    let binary = binary.display().to_string();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{label}</string>
  <key>ProgramArguments</key>
  <array>
    <string>{binary}</string>
    <string>run</string>
  </array>
  <key>RunAtLoad</key>
  <true/>
  <key>KeepAlive</key>
  <false/>
</dict>
</plist>
"#,
        label = AUTOSTART_LABEL,
        binary = xml_escape(&binary),
    )
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Enabled network services; the first line of the listing is a legend and
/// disabled services are prefixed with `*`.
pub fn parse_network_services(listing: &str) -> Vec<String> {
    listing
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('*'))
        .map(str::to_string)
        .collect()
}

/// AppleScript that runs `exe args..` detached with administrator rights.
pub fn elevation_script(exe: &Path, args: &[String]) -> String {
    let mut command = shell_quote(&exe.display().to_string());
    for arg in args {
        command.push(' ');
        command.push_str(&shell_quote(arg));
    }
    command.push_str(" > /dev/null 2>&1 &");
    let escaped = command.replace('\\', "\\\\").replace('"', "\\\"");
    format!("do shell script \"{escaped}\" with administrator privileges")
}

fn network_services() -> Result<Vec<String>, PlatformError> {
    let listing = run_tool("networksetup", ["-listallnetworkservices"])?;
    Ok(parse_network_services(&listing))
}

impl Platform for MacOs {
    fn set_system_proxy(&self, addr: SocketAddr) -> Result<(), PlatformError> {
        let host = addr.ip().to_string();
        let port = addr.port().to_string();
        for service in network_services()? {
            for flag in ["-setwebproxy", "-setsecurewebproxy", "-setsocksfirewallproxy"] {
                run_tool("networksetup", [flag, service.as_str(), host.as_str(), port.as_str()])?;
            }
        }
        tracing::info!(%addr, "system proxy enabled");
        Ok(())
    }

    fn clear_system_proxy(&self) -> Result<(), PlatformError> {
        for service in network_services()? {
            for flag in [
                "-setwebproxystate",
                "-setsecurewebproxystate",
                "-setsocksfirewallproxystate",
            ] {
                run_tool("networksetup", [flag, service.as_str(), "off"])?;
            }
        }
        tracing::info!("system proxy cleared");
        Ok(())
    }

    fn is_elevated(&self) -> bool {
        matches!(current_uid().as_deref(), Ok("0"))
    }

    fn relaunch_elevated(&self, exe: &Path, args: &[String]) -> Result<(), PlatformError> {
        tool("osascript")
            .arg("-e")
            .arg(elevation_script(exe, args))
            .spawn()
            .map_err(|e| io_err("osascript", e))?;
        Ok(())
    }

    fn register_autostart(&self, exe: &Path) -> Result<String, PlatformError> {
        let plist = write_entry(&self.plist_path(), &generate_plist(exe))?;

        let domain = format!("gui/{}", current_uid()?);
        let service = format!("{domain}/{AUTOSTART_LABEL}");
        run_tool_lenient("launchctl", ["bootout", service.as_str()]);
        run_tool(
            "launchctl",
            ["bootstrap".to_string(), domain, plist.display().to_string()],
        )?;
        Ok(plist.display().to_string())
    }

    fn unregister_autostart(&self) -> Result<(), PlatformError> {
        let plist = self.plist_path();
        if plist.exists() {
            let service = format!("gui/{}/{AUTOSTART_LABEL}", current_uid()?);
            run_tool_lenient("launchctl", ["bootout", service.as_str()]);
            fs::remove_file(&plist).map_err(|e| io_err(&plist, e))?;
        }
        Ok(())
    }
}
