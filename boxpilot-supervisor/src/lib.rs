//! Kernel process supervision and the OS integration it depends on.
//!
//! [`Supervisor`] owns at most one kernel process and serializes start, stop,
//! restart, mode switches and elevation behind a single lock. OS specifics
//! (system proxy, elevation, autostart) sit behind the [`Platform`] trait.

pub mod command;
mod error;
pub mod platform;
mod supervisor;

pub use command::KernelCommand;
pub use error::{PlatformError, SupervisorError};
pub use platform::{native as native_platform, Platform};
pub use supervisor::{ElevationOutcome, Supervisor, DEFAULT_PROXY_ENDPOINT, DEFAULT_STOP_TIMEOUT};
