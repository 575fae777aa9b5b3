//! boxpilot core library: domain types, app paths, settings persistence, errors.
//!
//! Public API surface:
//! - [`types`]: proxy mode, kernel status, host target
//! - [`error`]: [`SettingsError`], [`UnknownModeError`]
//! - [`paths`]: app-owned directory layout
//! - [`settings`]: load / save

pub mod error;
pub mod paths;
pub mod settings;
pub mod types;

pub use error::{SettingsError, UnknownModeError};
pub use settings::Settings;
pub use types::{HostTarget, KernelStatus, ProxyMode};
