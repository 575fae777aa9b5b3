use thiserror::Error;

/// Error surface for the kernel control API client.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Nothing accepts connections at the control address; the kernel is not
    /// running (or not yet listening).
    #[error("kernel is not running (control API unreachable at {addr})")]
    Unreachable {
        addr: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("control API transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// `PUT /proxies/{group}` answered 404.
    #[error("unknown routing group '{group}': {message}")]
    UnknownGroup { group: String, message: String },

    /// `PUT /proxies/{group}` answered 400.
    #[error("cannot select '{name}' in '{group}': {message}")]
    UnknownMember {
        group: String,
        name: String,
        message: String,
    },

    /// Any other non-success status, with the kernel's message verbatim.
    #[error("control API rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("control API returned malformed JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// An event line grew past the cap without a newline.
    #[error("control API streamed a line longer than {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("invalid control address '{0}'")]
    InvalidAddress(String),
}

impl ControlError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ControlError::Unreachable { .. })
    }
}
