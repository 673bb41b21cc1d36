use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opening and closing delimiter of a tool block.
pub const FENCE: &str = "```";

/// Lifecycle of a fenced tool block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// The fence is still open.
    Running,
    /// The fence closed without an explicit outcome.
    Completed,
    /// The block reported `Tool status: succeeded`.
    Succeeded,
    /// The block reported `Tool status: failed`.
    Failed,
}

impl ToolStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Text,
    Tool,
}

/// A classified span of accumulated response text.
///
/// A `Tool` segment's `content` always starts with [`FENCE`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSegment {
    pub kind: SegmentKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolStatus>,
    pub is_complete: bool,
}

impl ChatSegment {
    pub fn text(content: impl Into<String>, is_complete: bool) -> Self {
        Self {
            kind: SegmentKind::Text,
            content: content.into(),
            name: None,
            status: None,
            is_complete,
        }
    }

    pub fn is_tool(&self) -> bool {
        self.kind == SegmentKind::Tool
    }
}

/// One displayable unit of a conversation.
///
/// Turns synthesized from a live stream are recomputed on every update;
/// persisted history uses the same shape so a consumer can merge the two.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    /// Echo of the user's instruction.
    Instruction {
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// Model response prose.
    Model { content: String, is_complete: bool },
    /// Marker standing in for older, summarized history.
    CompressedHistory { summary: String },
    /// A tool invocation and, once available, its response.
    Tool {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        status: ToolStatus,
        content: String,
        is_complete: bool,
    },
}

impl Turn {
    /// Creates an instruction echo turn.
    pub fn instruction(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::Instruction {
            content: content.into(),
            timestamp,
        }
    }

    /// Returns the primary text of the turn.
    pub fn content(&self) -> &str {
        match self {
            Self::Instruction { content, .. }
            | Self::Model { content, .. }
            | Self::Tool { content, .. } => content,
            Self::CompressedHistory { summary } => summary,
        }
    }

    /// Whether the turn is final. Instructions and history markers always are.
    pub fn is_complete(&self) -> bool {
        match self {
            Self::Model { is_complete, .. } | Self::Tool { is_complete, .. } => *is_complete,
            Self::Instruction { .. } | Self::CompressedHistory { .. } => true,
        }
    }
}

impl From<ChatSegment> for Turn {
    fn from(segment: ChatSegment) -> Self {
        match segment.kind {
            SegmentKind::Text => Turn::Model {
                content: segment.content,
                is_complete: segment.is_complete,
            },
            SegmentKind::Tool => Turn::Tool {
                name: segment.name,
                status: segment.status.unwrap_or(ToolStatus::Running),
                content: segment.content,
                is_complete: segment.is_complete,
            },
        }
    }
}
