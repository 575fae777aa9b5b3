use std::path::PathBuf;

use thiserror::Error;

/// Failures while assembling the service from settings and template.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("settings error: {0}")]
    Settings(#[from] boxpilot_core::SettingsError),

    #[error("template error: {0}")]
    Template(#[from] boxpilot_synth::SynthError),

    #[error("control client error: {0}")]
    Control(#[from] boxpilot_control::ControlError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[source] reqwest::Error),
}

/// Failures while fetching and installing a kernel release.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed release manifest from {url}: {source}")]
    Manifest {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("release {tag} has no asset ending in '{suffix}'")]
    NoAsset { tag: String, suffix: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract {archive}: {detail}")]
    Unpack { archive: PathBuf, detail: String },

    #[error("no '{binary}' found in extracted release under {dir}")]
    BinaryMissing { binary: String, dir: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ReleaseError {
    ReleaseError::Io {
        path: path.into(),
        source,
    }
}
