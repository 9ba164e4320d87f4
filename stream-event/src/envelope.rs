//! Envelope fields applied to every [`CoreEvent`]: `step_id`, `thread_id`, `ts` (spec §3, §6).
//! `EnvelopeState` tracks the current step and timestamps events as they are serialized.

use crate::event::CoreEvent;
use serde_json::Value;

/// Envelope fields merged into every event on the wire (spec §3: "Every event carries
/// `{step_id, thread_id, ts}`").
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Identifies the request/run this event belongs to.
    pub step_id: Option<String>,
    /// Conversation thread, when the event is thread-scoped.
    pub thread_id: Option<String>,
    /// ISO8601 timestamp.
    pub ts: Option<String>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_id(mut self, id: impl Into<String>) -> Self {
        self.step_id = Some(id.into());
        self
    }

    pub fn with_thread_id(mut self, id: impl Into<String>) -> Self {
        self.thread_id = Some(id.into());
        self
    }

    pub fn with_ts(mut self, ts: impl Into<String>) -> Self {
        self.ts = Some(ts.into());
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite fields already present on the event payload.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.step_id {
            obj.entry("step_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref id) = self.thread_id {
            obj.entry("thread_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref ts) = self.ts {
            obj.entry("ts").or_insert_with(|| Value::String(ts.clone()));
        }
    }
}

/// Envelope state for one request: step id, thread id, and a clock for `ts`.
///
/// One `EnvelopeState` is created per `Stream`/`Resume` call and threaded through
/// the event multiplexer (C9) so every event it forwards carries a consistent envelope.
pub struct EnvelopeState {
    pub step_id: String,
    pub thread_id: Option<String>,
}

impl EnvelopeState {
    pub fn new(step_id: String, thread_id: Option<String>) -> Self {
        Self { step_id, thread_id }
    }

    /// Injects the envelope into the event value, stamping `ts` with the current time.
    pub fn inject_into(&self, value: &mut Value) {
        let env = Envelope::new()
            .with_step_id(&self.step_id)
            .with_ts(chrono::Utc::now().to_rfc3339());
        let env = match &self.thread_id {
            Some(t) => env.with_thread_id(t.clone()),
            None => env,
        };
        env.inject_into(value);
    }
}

/// Converts a core event to JSON and injects the envelope using the given state.
pub fn to_json(event: &CoreEvent, state: &EnvelopeState) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}
