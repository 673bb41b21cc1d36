/// Errors raised while opening or reading an instruction stream.
///
/// None of these escape `StreamController::start_streaming`; the controller
/// folds them into the `error` field of the published state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (empty instruction, malformed session id).
    #[error("validation error: {0}")]
    Validation(String),
    /// The backend answered with a non-2xx status.
    ///
    /// `message` is the backend's `message` field when the error body is
    /// JSON, otherwise the status reason phrase.
    #[error("{message}")]
    Http { status: u16, message: String },
    /// Connection or body read failed.
    #[error("network error: {0}")]
    Transport(String),
}

impl StreamError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status when the failure came from a response status.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
