use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use super::{current_uid, run_tool, tool, write_entry, Platform};
use crate::error::{io_err, PlatformError};

const DESKTOP_FILE: &str = "boxpilot.desktop";
const PROXY_SCHEMA: &str = "org.gnome.system.proxy";

/// GNOME proxy settings, XDG autostart, and `pkexec`.
#[derive(Debug, Clone)]
pub struct Linux {
    home: PathBuf,
}

impl Linux {
    pub fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
        }
    }

    fn desktop_path(&self) -> PathBuf {
        self.home
            .join(".config")
            .join("autostart")
            .join(DESKTOP_FILE)
    }
}

/// XDG autostart entry running `exe run` at login.
pub fn desktop_entry(exe: &Path) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name=boxpilot\n\
         Exec=\"{}\" run\n\
         Terminal=false\n\
         X-GNOME-Autostart-enabled=true\n",
        exe.display()
    )
}

fn gsettings(schema: &str, key: &str, value: &str) -> Result<(), PlatformError> {
    run_tool("gsettings", ["set", schema, key, value]).map(|_| ())
}

impl Platform for Linux {
    fn set_system_proxy(&self, addr: SocketAddr) -> Result<(), PlatformError> {
        let host = addr.ip().to_string();
        let port = addr.port().to_string();
        for scheme in ["http", "https", "socks"] {
            let schema = format!("{PROXY_SCHEMA}.{scheme}");
            gsettings(&schema, "host", &host)?;
            gsettings(&schema, "port", &port)?;
        }
        gsettings(PROXY_SCHEMA, "mode", "manual")?;
        tracing::info!(%addr, "system proxy enabled");
        Ok(())
    }

    fn clear_system_proxy(&self) -> Result<(), PlatformError> {
        gsettings(PROXY_SCHEMA, "mode", "none")?;
        tracing::info!("system proxy cleared");
        Ok(())
    }

    fn is_elevated(&self) -> bool {
        matches!(current_uid().as_deref(), Ok("0"))
    }

    fn relaunch_elevated(&self, exe: &Path, args: &[String]) -> Result<(), PlatformError> {
        tool("pkexec")
            .arg(exe)
            .args(args)
            .spawn()
            .map_err(|e| io_err("pkexec", e))?;
        Ok(())
    }

    fn register_autostart(&self, exe: &Path) -> Result<String, PlatformError> {
        let entry = write_entry(&self.desktop_path(), &desktop_entry(exe))?;
        Ok(entry.display().to_string())
    }

    fn unregister_autostart(&self) -> Result<(), PlatformError> {
        let entry = self.desktop_path();
        if entry.exists() {
            fs::remove_file(&entry).map_err(|e| io_err(&entry, e))?;
        }
        Ok(())
    }
}
