//! Event Stream Multiplexer (C9): merges C6/C7/C8 event producers into one
//! ordered [`stream_event::CoreEvent`] stream, enforces exactly-one-terminal
//! (spec P6), and propagates cancellation on consumer disconnect.
//!
//! Grounded in `loom/src/stream/mod.rs`'s `StreamWriter<S>`/`StreamMode`
//! (mode-gated emit methods over an mpsc channel), generalized from the
//! teacher's generic `StreamEvent<S>` to this spec's concrete `CoreEvent`.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stream_event::{to_json, CoreEvent, EnvelopeState};

/// A raw token of assistant text, emitted before it's wrapped into a
/// `text_chunk` event (mirrors the teacher's `MessageChunk`).
#[derive(Debug, Clone)]
pub struct MessageChunk {
    pub content: String,
}

/// Which pipeline a `Stream` call drives (spec §6 `Stream(... mode ...)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    React,
    PlanExecute,
    DeepResearch,
}

/// Per-request handle given to a single producer (C6, C7, or one C8 batch).
/// Wraps the outbound channel, the request's envelope state (`step_id`,
/// `thread_id`), and its cancellation token; enforces P6 by refusing to send
/// any event after the first terminal one.
#[derive(Clone)]
pub struct StreamWriter {
    tx: mpsc::Sender<CoreEvent>,
    state: EnvelopeState,
    cancel: CancellationToken,
    terminal_sent: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl StreamWriter {
    pub fn new(tx: mpsc::Sender<CoreEvent>, thread_id: impl Into<String>, cancel: CancellationToken) -> Self {
        StreamWriter {
            tx,
            state: EnvelopeState::new(uuid::Uuid::new_v4().to_string(), Some(thread_id.into())),
            cancel,
            terminal_sent: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sends `event`, dropping it silently if a terminal event was already
    /// sent (P6) or the consumer disconnected.
    pub async fn emit(&self, event: CoreEvent) -> bool {
        if self.terminal_sent.load(std::sync::atomic::Ordering::Acquire) {
            return false;
        }
        if event.is_terminal() {
            self.terminal_sent.store(true, std::sync::atomic::Ordering::Release);
        }
        self.tx.send(event).await.is_ok()
    }

    /// Serializes `event` with this writer's envelope stamped on (used by
    /// callers that forward events over the wire rather than re-dispatching
    /// the typed `CoreEvent`).
    pub fn to_wire(&self, event: &CoreEvent) -> Result<serde_json::Value, serde_json::Error> {
        to_json(event, &self.state)
    }
}

/// Merges independent producers into one ordered channel for a single
/// request, matching spec §4.9: relative ordering within a producer is
/// preserved; producers are joined sequentially since only the deep-research
/// pool fans out internally (and serializes its own completions before
/// handing them to the multiplexer).
pub struct EventMultiplexer {
    tx: mpsc::Sender<CoreEvent>,
    rx: Option<mpsc::Receiver<CoreEvent>>,
    cancel: CancellationToken,
}

impl EventMultiplexer {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        EventMultiplexer {
            tx,
            rx: Some(rx),
            cancel: CancellationToken::new(),
        }
    }

    /// A writer bound to this multiplexer's channel and cancellation token,
    /// for a single request's `thread_id`.
    pub fn writer_for(&self, thread_id: impl Into<String>) -> StreamWriter {
        StreamWriter::new(self.tx.clone(), thread_id, self.cancel.clone())
    }

    /// Takes ownership of the receiving end; callers drain this to produce
    /// the outbound event stream. Returns `None` if already taken.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<CoreEvent>> {
        self.rx.take()
    }

    /// Signals cancellation to every producer holding a writer from this
    /// multiplexer (spec §4.9: "when the consumer disconnects...").
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
