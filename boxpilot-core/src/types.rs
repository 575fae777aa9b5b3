//! Domain types shared by every boxpilot crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnknownModeError;

// ---------------------------------------------------------------------------
// Proxy mode
// ---------------------------------------------------------------------------

/// How traffic reaches the kernel.
///
/// `System` points the OS-level HTTP/SOCKS proxy setting at the kernel's
/// mixed inbound. `Tun` lets the kernel's TUN inbound capture routing
/// directly; any system proxy setting must be cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    System,
    Tun,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::System => "system",
            ProxyMode::Tun => "tun",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyMode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(ProxyMode::System),
            "tun" => Ok(ProxyMode::Tun),
            _ => Err(UnknownModeError(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel status
// ---------------------------------------------------------------------------

/// Observable state of the supervised kernel process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum KernelStatus {
    Stopped,
    Running { pid: u32 },
}

impl KernelStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, KernelStatus::Running { .. })
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            KernelStatus::Running { pid } => Some(*pid),
            KernelStatus::Stopped => None,
        }
    }
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelStatus::Stopped => write!(f, "stopped"),
            KernelStatus::Running { pid } => write!(f, "running (pid {pid})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Host target
// ---------------------------------------------------------------------------

/// Platform/architecture pair in the naming scheme used by kernel release
/// assets (`darwin`, `linux`, `windows` × `amd64`, `arm64`, `386`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub platform: String,
    pub architecture: String,
}

impl HostTarget {
    /// Target of the running binary.
    pub fn current() -> Self {
        Self::from_rust(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map Rust `target_os` / `target_arch` names to release asset names.
    pub fn from_rust(os: &str, arch: &str) -> Self {
        let platform = match os {
            "macos" => "darwin",
            other => other,
        };
        let architecture = match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "arm" => "armv7",
            other => other,
        };
        Self {
            platform: platform.to_string(),
            architecture: architecture.to_string(),
        }
    }

    /// Suffix a matching release asset name ends with, e.g. `linux-amd64.zip`.
    pub fn asset_suffix(&self) -> String {
        format!("{}-{}.zip", self.platform, self.architecture)
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform, self.architecture)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
