use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::decoder::EventDecoder;
use crate::errors::StreamError;
use crate::event::SseEvent;
use crate::synth::synthesize_turns;
use crate::transport::{HttpTransport, StreamRequest, StreamTransport};
use crate::turn::Turn;

/// Accumulated state of the current streaming session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamState {
    /// Response text so far. Append-only within one session.
    pub streamed_text: String,
    pub is_loading: bool,
    /// Terminal failure message, if the session failed.
    pub error: Option<String>,
    /// Instruction echo, set at most once per session.
    pub instruction_turn: Option<Turn>,
}

/// What a subscriber sees after every update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamSnapshot {
    /// Bumped when a session starts, and when an active session is
    /// aborted, reset, or dropped. Unchanged by aborts with nothing running.
    pub generation: u64,
    pub state: StreamState,
    /// Turns synthesized from `state`, instruction first.
    pub turns: Vec<Turn>,
}

impl StreamSnapshot {
    fn new(generation: u64, state: &StreamState) -> Self {
        Self {
            generation,
            turns: synthesize_turns(
                &state.streamed_text,
                state.is_loading,
                state.instruction_turn.as_ref(),
            ),
            state: state.clone(),
        }
    }
}

/// How a streaming session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `complete` arrived or the server closed the body.
    Completed,
    /// Aborted, reset, superseded by a newer session, or the controller was
    /// dropped. Never sets `error`.
    Cancelled,
    /// Terminal failure; the message is also in `StreamState::error`.
    Failed(String),
}

/// Handle used to cancel the in-flight read of one session.
struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

struct Inner {
    state: StreamState,
    generation: u64,
    active: Option<AbortHandle>,
}

impl Inner {
    /// Cancels the active read (if any) and invalidates its generation.
    fn cancel_active(&mut self) -> bool {
        match self.active.take() {
            Some(handle) => {
                handle.abort();
                self.generation += 1;
                true
            }
            None => false,
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    updates: watch::Sender<StreamSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.updates
            .send_replace(StreamSnapshot::new(inner.generation, &inner.state));
    }

    /// Applies decoded events for `generation`.
    ///
    /// Returns `None` when the generation is stale, otherwise whether a
    /// `complete` event was seen. Events after `complete` are dropped.
    fn apply_events(&self, generation: u64, events: Vec<SseEvent>) -> Option<bool> {
        let mut inner = self.lock();
        if inner.generation != generation {
            return None;
        }
        for event in events {
            match apply_event(&mut inner.state, event) {
                EventEffect::Unchanged => {}
                EventEffect::Changed => self.publish(&inner),
                EventEffect::Complete => return Some(true),
            }
        }
        Some(false)
    }

    /// Ends the session for `generation`. No-op when the generation is stale.
    fn finish(&self, generation: u64, error: Option<String>) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.active = None;
        inner.state.is_loading = false;
        if error.is_some() {
            inner.state.error = error;
        }
        self.publish(&inner);
        true
    }
}

/// Owns at most one instruction stream at a time and publishes its
/// accumulated state to subscribers.
///
/// Starting a new session always cancels the previous one first. Dropping
/// the controller cancels any in-flight read.
pub struct StreamController {
    transport: Arc<dyn StreamTransport>,
    shared: Arc<Shared>,
}

impl StreamController {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        let (updates, _) = watch::channel(StreamSnapshot::default());
        Self {
            transport,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: StreamState::default(),
                    generation: 0,
                    active: None,
                }),
                updates,
            }),
        }
    }

    /// Creates a controller backed by [`HttpTransport`].
    pub fn http(config: ClientConfig) -> Result<Self, StreamError> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// Subscribes to snapshots. The receiver starts at the current one.
    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.shared.updates.subscribe()
    }

    /// Returns the latest published snapshot.
    pub fn snapshot(&self) -> StreamSnapshot {
        self.shared.updates.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.lock().state.is_loading
    }

    /// Starts a session and returns without waiting for it to finish.
    ///
    /// The previous session (if any) is cancelled and the state reset before
    /// this returns. Must be called from within a Tokio runtime.
    pub fn spawn_streaming(
        &self,
        session_id: impl Into<String>,
        instruction: impl Into<String>,
    ) -> StreamTask {
        let request = StreamRequest::new(session_id, instruction);
        let (abort_tx, abort_rx) = watch::channel(false);

        let generation = {
            let mut inner = self.shared.lock();
            if inner.cancel_active() {
                debug!(session_id = %request.session_id, "superseding active stream");
            }
            inner.generation += 1;
            inner.state = StreamState {
                is_loading: true,
                ..StreamState::default()
            };
            inner.active = Some(AbortHandle { tx: abort_tx });
            self.shared.publish(&inner);
            inner.generation
        };

        let handle = tokio::spawn(run_session(
            self.shared.clone(),
            self.transport.clone(),
            request,
            generation,
            abort_rx,
        ));
        StreamTask { generation, handle }
    }

    /// Starts a session and waits until it completes, fails, or is
    /// cancelled. Failures are reported through the published state and the
    /// returned outcome, never as an error.
    pub async fn start_streaming(
        &self,
        session_id: impl Into<String>,
        instruction: impl Into<String>,
    ) -> StreamOutcome {
        self.spawn_streaming(session_id, instruction).wait().await
    }

    /// Cancels the active read and clears the loading flag. Idempotent.
    pub fn abort_streaming(&self) {
        let mut inner = self.shared.lock();
        let cancelled = inner.cancel_active();
        if cancelled || inner.state.is_loading {
            inner.state.is_loading = false;
            self.shared.publish(&inner);
        }
    }

    /// Aborts and clears all accumulated state.
    pub fn reset(&self) {
        let mut inner = self.shared.lock();
        inner.cancel_active();
        inner.state = StreamState::default();
        self.shared.publish(&inner);
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if inner.cancel_active() {
            inner.state.is_loading = false;
            self.shared.publish(&inner);
        }
    }
}

/// A running session started by [`StreamController::spawn_streaming`].
pub struct StreamTask {
    generation: u64,
    handle: JoinHandle<StreamOutcome>,
}

impl StreamTask {
    /// Generation of the snapshots this session publishes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for the session to end.
    pub async fn wait(self) -> StreamOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => StreamOutcome::Failed(format!("stream task ended abnormally: {err}")),
        }
    }
}

async fn run_session(
    shared: Arc<Shared>,
    transport: Arc<dyn StreamTransport>,
    request: StreamRequest,
    generation: u64,
    mut abort_rx: watch::Receiver<bool>,
) -> StreamOutcome {
    let session_id = request.session_id.clone();
    if let Err(err) = request.validate() {
        return fail(&shared, generation, err);
    }

    let opened = tokio::select! {
        biased;
        _ = aborted(&mut abort_rx) => return StreamOutcome::Cancelled,
        opened = transport.open(&request) => opened,
    };
    let mut body = match opened {
        Ok(body) => body,
        Err(err) => return fail(&shared, generation, err),
    };

    let mut decoder = EventDecoder::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = aborted(&mut abort_rx) => {
                debug!(%session_id, generation, "stream cancelled");
                return StreamOutcome::Cancelled;
            }
            next = body.next() => next,
        };

        let (events, at_end) = match next {
            Some(Ok(chunk)) => {
                debug!(%session_id, generation, bytes = chunk.len(), "stream chunk");
                (decoder.push_chunk(&chunk), false)
            }
            Some(Err(err)) => return fail(&shared, generation, err),
            None => (decoder.finish(), true),
        };

        match shared.apply_events(generation, events) {
            None => return StreamOutcome::Cancelled,
            Some(true) => {
                debug!(%session_id, generation, "stream complete");
                return complete(&shared, generation);
            }
            Some(false) if at_end => {
                debug!(
                    %session_id,
                    generation,
                    skipped_frames = decoder.skipped_frames(),
                    "stream closed by server"
                );
                return complete(&shared, generation);
            }
            Some(false) => {}
        }
    }
}

/// Resolves once the session is aborted or its handle is dropped.
async fn aborted(abort_rx: &mut watch::Receiver<bool>) {
    let _ = abort_rx.wait_for(|aborted| *aborted).await;
}

fn complete(shared: &Shared, generation: u64) -> StreamOutcome {
    if shared.finish(generation, None) {
        StreamOutcome::Completed
    } else {
        StreamOutcome::Cancelled
    }
}

fn fail(shared: &Shared, generation: u64, err: StreamError) -> StreamOutcome {
    let message = err.to_string();
    if shared.finish(generation, Some(message.clone())) {
        warn!(generation, error = %message, "stream failed");
        StreamOutcome::Failed(message)
    } else {
        StreamOutcome::Cancelled
    }
}

#[derive(Debug, PartialEq, Eq)]
enum EventEffect {
    Unchanged,
    Changed,
    Complete,
}

fn apply_event(state: &mut StreamState, event: SseEvent) -> EventEffect {
    match event {
        SseEvent::Instruction { content, timestamp } => {
            set_instruction(state, content, timestamp.as_ref())
        }
        SseEvent::Message {
            content,
            role,
            timestamp,
        } => {
            if let Some(instruction) = instruction_from_message(&content) {
                set_instruction(state, instruction, timestamp.as_ref())
            } else if role.as_deref() == Some("user") {
                set_instruction(state, content, timestamp.as_ref())
            } else {
                append(state, &content)
            }
        }
        SseEvent::Chunk { content } => append(state, &content),
        SseEvent::ToolUse {
            tool_name,
            parameters,
            ..
        } => append(state, &render_tool_use(&tool_name, &parameters)),
        SseEvent::ToolResult {
            status,
            output,
            message,
            ..
        } => {
            let body = [output, message]
                .into_iter()
                .flatten()
                .find(|value| !value.is_null())
                .map(|value| payload_text(&value))
                .unwrap_or_default();
            append(state, &render_tool_result(&status, &body))
        }
        SseEvent::Complete { .. } => EventEffect::Complete,
        SseEvent::Error { message } => {
            warn!(
                message = message.as_deref().unwrap_or("<none>"),
                "backend reported an error event"
            );
            EventEffect::Unchanged
        }
        SseEvent::Start { session_id } | SseEvent::Init { session_id, .. } => {
            debug!(session_id = session_id.as_deref().unwrap_or(""), "stream started");
            EventEffect::Unchanged
        }
        SseEvent::Unknown => EventEffect::Unchanged,
    }
}

fn append(state: &mut StreamState, fragment: &str) -> EventEffect {
    if fragment.is_empty() {
        return EventEffect::Unchanged;
    }
    state.streamed_text.push_str(fragment);
    EventEffect::Changed
}

fn set_instruction(
    state: &mut StreamState,
    content: String,
    timestamp: Option<&serde_json::Value>,
) -> EventEffect {
    if state.instruction_turn.is_some() {
        return EventEffect::Unchanged;
    }
    let timestamp = timestamp
        .and_then(serde_json::Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    state.instruction_turn = Some(Turn::instruction(content, timestamp));
    EventEffect::Changed
}

/// Extracts `instruction` from a message whose content is a JSON object.
fn instruction_from_message(content: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    value
        .get("instruction")
        .and_then(|v| v.as_str())
        .map(ToOwned::to_owned)
}

fn render_tool_use(tool_name: &str, parameters: &serde_json::Value) -> String {
    let mut block = format!("```\nTool call: `{tool_name}`\n");
    if !parameters.is_null() {
        let pretty =
            serde_json::to_string_pretty(parameters).unwrap_or_else(|_| parameters.to_string());
        block.push_str("Parameters:\n");
        block.push_str(&pretty);
        block.push('\n');
    }
    block.push_str("```\n");
    block
}

/// Strings render as-is, any other JSON pretty-printed.
fn payload_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn render_tool_result(status: &str, body: &str) -> String {
    let mut block = format!("```\nTool status: {}\n", normalize_tool_status(status));
    if !body.is_empty() {
        block.push_str(body);
        if !body.ends_with('\n') {
            block.push('\n');
        }
    }
    block.push_str("```\n");
    block
}

fn normalize_tool_status(status: &str) -> &str {
    match status.trim().to_ascii_lowercase().as_str() {
        "success" | "succeeded" | "ok" => "succeeded",
        "error" | "failed" | "failure" => "failed",
        _ => status.trim(),
    }
}
