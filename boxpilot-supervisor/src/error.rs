use std::path::PathBuf;

use thiserror::Error;

use boxpilot_core::UnknownModeError;

/// Error surface for the kernel process lifecycle.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("kernel is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("kernel is not running")]
    NotRunning,

    #[error("failed to start kernel {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    UnknownMode(#[from] UnknownModeError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("failed to relaunch with administrator rights: {source}")]
    Elevation {
        #[source]
        source: PlatformError,
    },
}

/// Failures of the OS integration layer (system proxy, elevation, autostart).
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed (status {status}): {detail}")]
    Command {
        tool: String,
        status: String,
        detail: String,
    },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    /// The blocking task running an OS tool panicked or was cancelled.
    #[error("platform call interrupted: {0}")]
    Interrupted(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PlatformError {
    PlatformError::Io {
        path: path.into(),
        source,
    }
}
