//! Incremental ingestion of instruction-execution streams.
//!
//! A backend answers an instruction with a chunked body of `data: <json>`
//! frames. This crate decodes those frames as bytes arrive, accumulates the
//! response text, and re-derives an ordered list of renderable [`Turn`]s on
//! every update.
//!
//! # Usage
//!
//! ```no_run
//! use instruction_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let controller = StreamController::http(ClientConfig::from_env()?)?;
//! let mut updates = controller.subscribe();
//!
//! let task = controller.spawn_streaming("session-1", "list the repo files");
//! while updates.changed().await.is_ok() {
//!     let snapshot = updates.borrow_and_update().clone();
//!     println!("{} turns so far", snapshot.turns.len());
//!     if !snapshot.state.is_loading {
//!         break;
//!     }
//! }
//! println!("{:?}", task.wait().await);
//! # Ok(())
//! # }
//! ```

/// Client configuration for the HTTP transport.
pub mod config;
/// Streaming session controller and published state.
pub mod controller;
/// Byte-to-event frame decoder.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Wire event model.
pub mod event;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Segment and turn synthesis.
pub mod synth;
/// Transport seam and HTTP implementation.
pub mod transport;
/// Segments and turns.
pub mod turn;

pub use config::ClientConfig;
pub use controller::{StreamController, StreamOutcome, StreamSnapshot, StreamState, StreamTask};
pub use decoder::EventDecoder;
pub use errors::StreamError;
pub use event::SseEvent;
pub use synth::{parse_segments, segments_to_turns, synthesize_turns};
pub use transport::{ByteStream, HttpTransport, StreamRequest, StreamTransport};
pub use turn::{ChatSegment, SegmentKind, ToolStatus, Turn};
