//! Operator settings persisted at `<home>/.boxpilot/settings.yaml`.
//!
//! # API pattern
//!
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! A missing file is not an error: every field has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, SettingsError};
use crate::paths::{self, settings_path};
use crate::types::ProxyMode;

pub const DEFAULT_RELEASE_API: &str =
    "https://api.github.com/repos/SagerNet/sing-box/releases/latest";

/// Operator-editable configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Last subscription URL applied; reused when `subscription apply` gets no URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_url: Option<String>,

    #[serde(default)]
    pub mode: ProxyMode,

    /// Replacement for the embedded routing template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,

    /// Overrides the control API address declared by the template
    /// (`experimental.clash_api.external_controller`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,

    #[serde(default = "default_release_api")]
    pub release_api: String,

    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_release_api() -> String {
    DEFAULT_RELEASE_API.to_string()
}

fn default_readiness_attempts() -> u32 {
    20
}

fn default_readiness_interval_ms() -> u64 {
    250
}

fn default_stop_timeout_ms() -> u64 {
    3_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            subscription_url: None,
            mode: ProxyMode::default(),
            template_path: None,
            controller: None,
            release_api: default_release_api(),
            readiness_attempts: default_readiness_attempts(),
            readiness_interval_ms: default_readiness_interval_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Settings {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Load settings from `<home>/.boxpilot/settings.yaml`.
///
/// Returns defaults when the file is absent, `SettingsError::Parse` (with
/// path) when it is malformed.
pub fn load_at(home: &Path) -> Result<Settings, SettingsError> {
    let path = settings_path(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| SettingsError::Parse { path, source })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, SettingsError> {
    load_at(&paths::home_dir()?)
}

/// Atomically save settings.
///
/// Write flow: serialize → `settings.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let root = paths::app_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        set_dir_permissions(&root)?;
    }
    let path = settings_path(home);
    let tmp_path = path.with_file_name(format!("{}.tmp", paths::SETTINGS_FILE));

    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    if let Err(e) = std::fs::rename(&tmp_path, &path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(settings: &Settings) -> Result<(), SettingsError> {
    save_at(&paths::home_dir()?, settings)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), SettingsError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), SettingsError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), SettingsError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), SettingsError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
