//! Error types for boxpilot-synth.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while fetching, synthesizing, or persisting a
/// kernel configuration.
#[derive(Debug, Error)]
pub enum SynthError {
    /// The subscription request never produced a response body.
    #[error("failed to fetch subscription from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The subscription server answered with a non-success status.
    #[error("subscription server {url} returned {status}")]
    FetchStatus { url: String, status: u16 },

    /// Either document failed structural parsing.
    #[error("failed to decode {document}: {source}")]
    Decode {
        document: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The template does not have the routing-group shape synthesis relies on.
    #[error("invalid template: {0}")]
    Template(String),

    /// A routing group references a tag that is not an outbound.
    #[error("routing group '{group}' references unknown outbound '{tag}'")]
    DanglingReference { group: String, tag: String },

    /// Writing the finished document failed.
    #[error("failed to write kernel config at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SynthError {
    /// True for failures caused by the structure of an input document.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            SynthError::Decode { .. } | SynthError::Template(_)
        )
    }
}

/// Convenience constructor for [`SynthError::Persist`].
pub(crate) fn persist_err(path: impl Into<PathBuf>, source: std::io::Error) -> SynthError {
    SynthError::Persist {
        path: path.into(),
        source,
    }
}
