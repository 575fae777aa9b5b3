//! App-owned directory layout.
//!
//! ```text
//! ~/.boxpilot/
//!   settings.yaml
//!   kernel/
//!     sing-box[.exe]      (installed kernel binary)
//!     config.json         (synthesized kernel config, overwritten per apply)
//!     subscription.json   (raw copy of the last fetched subscription)
//!     downloads/          (release archives + extraction scratch space)
//! ```
//!
//! Every helper takes an explicit `home`; callers resolve it once with
//! [`home_dir`].

use std::path::{Path, PathBuf};

use crate::error::SettingsError;

pub const APP_DIR: &str = ".boxpilot";
pub const AUTOSTART_LABEL: &str = "dev.boxpilot.agent";
pub const SETTINGS_FILE: &str = "settings.yaml";
pub const KERNEL_CONFIG_FILE: &str = "config.json";
pub const SUBSCRIPTION_CACHE_FILE: &str = "subscription.json";

#[cfg(windows)]
pub const KERNEL_BINARY: &str = "sing-box.exe";
#[cfg(not(windows))]
pub const KERNEL_BINARY: &str = "sing-box";

pub fn home_dir() -> Result<PathBuf, SettingsError> {
    dirs::home_dir().ok_or(SettingsError::HomeNotFound)
}

pub fn app_root(home: &Path) -> PathBuf {
    home.join(APP_DIR)
}

pub fn settings_path(home: &Path) -> PathBuf {
    app_root(home).join(SETTINGS_FILE)
}

pub fn kernel_dir(home: &Path) -> PathBuf {
    app_root(home).join("kernel")
}

pub fn kernel_binary(home: &Path) -> PathBuf {
    kernel_dir(home).join(KERNEL_BINARY)
}

pub fn kernel_config(home: &Path) -> PathBuf {
    kernel_dir(home).join(KERNEL_CONFIG_FILE)
}

pub fn subscription_cache(home: &Path) -> PathBuf {
    kernel_dir(home).join(SUBSCRIPTION_CACHE_FILE)
}

pub fn downloads_dir(home: &Path) -> PathBuf {
    kernel_dir(home).join("downloads")
}
