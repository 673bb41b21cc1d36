use std::time::Duration;

use crate::errors::StreamError;

const BASE_URL_ENV: &str = "INSTRUCTION_STREAM_BASE_URL";
const CONNECT_TIMEOUT_ENV: &str = "INSTRUCTION_STREAM_CONNECT_TIMEOUT_SECS";

/// Configuration for the HTTP stream transport.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the instruction-execution backend.
    pub base_url: String,
    /// Optional TCP connect timeout.
    ///
    /// Once connected, the stream itself is never timed out; a stalled
    /// stream stays loading until the caller aborts.
    pub connect_timeout: Option<Duration>,
    /// `User-Agent` header sent with each request.
    pub user_agent: String,
}

impl ClientConfig {
    /// Creates a config for the given backend base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: None,
            user_agent: concat!("instruction-stream/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Builds a config from `INSTRUCTION_STREAM_BASE_URL` and the optional
    /// `INSTRUCTION_STREAM_CONNECT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, StreamError> {
        let base_url = std::env::var(BASE_URL_ENV).unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(StreamError::Config(format!("missing {BASE_URL_ENV}")));
        }
        let mut config = Self::new(base_url.trim());
        if let Ok(raw) = std::env::var(CONNECT_TIMEOUT_ENV) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                StreamError::Config(format!("{CONNECT_TIMEOUT_ENV} must be whole seconds, got {raw:?}"))
            })?;
            config = config.connect_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Sets the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Overrides the `User-Agent` header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub(crate) fn stream_url(&self, session_id: &str) -> String {
        format!(
            "{}/api/sessions/{}/stream",
            self.base_url.trim_end_matches('/'),
            session_id
        )
    }
}
