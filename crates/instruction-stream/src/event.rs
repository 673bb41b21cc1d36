use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One decoded `data:` frame from the instruction stream.
///
/// Two backend vocabularies share this enum: `start`/`instruction`/`chunk`/
/// `complete`/`error`, and `init`/`message`/`tool_use`/`tool_result`.
/// Frames with any other `type` decode to [`SseEvent::Unknown`].
///
/// Only `type` is strict. Text fields accept `null`, and metadata such as
/// `timestamp` or a tool `output` is kept as raw JSON so a frame is never
/// rejected over the shape of a field this crate only renders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    /// The backend accepted the instruction.
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Echo of the instruction being executed.
    Instruction {
        #[serde(default, deserialize_with = "null_as_default")]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },
    /// Incremental response text.
    Chunk {
        #[serde(default, deserialize_with = "null_as_default")]
        content: String,
    },
    /// End of the response; nothing after it is read.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Backend-reported error. Informational only.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Alternate vocabulary: session initialisation.
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },
    /// Alternate vocabulary: a message, either an instruction payload or
    /// response prose.
    Message {
        #[serde(default, deserialize_with = "null_as_default")]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },
    /// Alternate vocabulary: the model invoked a tool.
    ToolUse {
        #[serde(default, deserialize_with = "null_as_default")]
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_id: Option<String>,
        #[serde(default)]
        parameters: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },
    /// Alternate vocabulary: a tool finished.
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_id: Option<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },
    /// Any `type` this crate does not know about.
    #[serde(other)]
    Unknown,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl SseEvent {
    /// Returns the wire `type` name, or `None` for unknown events.
    pub fn kind(&self) -> Option<&'static str> {
        Some(match self {
            Self::Start { .. } => "start",
            Self::Instruction { .. } => "instruction",
            Self::Chunk { .. } => "chunk",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Init { .. } => "init",
            Self::Message { .. } => "message",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::Unknown => return None,
        })
    }
}
