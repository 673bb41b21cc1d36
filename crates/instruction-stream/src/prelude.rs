//! Common imports for typical usage.
pub use crate::{
    ChatSegment, ClientConfig, StreamController, StreamError, StreamOutcome, StreamSnapshot,
    StreamState, StreamTask, ToolStatus, Turn,
};
