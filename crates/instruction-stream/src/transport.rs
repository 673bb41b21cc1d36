use std::pin::Pin;

use futures::StreamExt as _;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::StreamError;

/// Raw response body chunks as they arrive.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// One instruction to execute within a backend session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamRequest {
    pub session_id: String,
    pub instruction: String,
}

impl StreamRequest {
    pub fn new(session_id: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            instruction: instruction.into(),
        }
    }

    /// Checks that the session id is a single non-empty path segment and the
    /// instruction is not blank. The controller runs this before any open.
    pub fn validate(&self) -> Result<(), StreamError> {
        let session_id = self.session_id.trim();
        if session_id.is_empty() {
            return Err(StreamError::Validation(
                "session id must not be empty".into(),
            ));
        }
        if session_id.contains(['/', '?', '#']) {
            return Err(StreamError::Validation(format!(
                "session id must be a single path segment, got {session_id:?}"
            )));
        }
        if self.instruction.trim().is_empty() {
            return Err(StreamError::Validation(
                "instruction must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Opens the response body for an instruction.
///
/// Requests reaching `open` have already passed [`StreamRequest::validate`].
/// Dropping the returned stream must release the underlying connection;
/// the controller relies on that for cancellation.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError>;
}

/// `StreamTransport` over HTTP: `POST {base}/api/sessions/{id}/stream`.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, StreamError> {
        if config.base_url.trim().is_empty() {
            return Err(StreamError::Config("base_url must not be empty".into()));
        }
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError> {
        let url = self.config.stream_url(request.session_id.trim());
        debug!(session_id = %request.session_id, %url, "opening instruction stream");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&serde_json::json!({ "instruction": request.instruction }))
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::http(
                status.as_u16(),
                error_message_from_body(&body, status),
            ));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::transport(format!("stream read failed: {e}"))));
        Ok(Box::pin(bytes))
    }
}

/// Prefers the backend's JSON `message`, falling back to the status text.
fn error_message_from_body(body: &str, status: reqwest::StatusCode) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| status.to_string())
        })
}
