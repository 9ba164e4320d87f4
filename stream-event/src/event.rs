//! Core event types: the tagged union streamed to callers (spec §3 CoreEvent, §6 wire shape).
//! Envelope fields (`step_id`, `thread_id`, `ts`) are applied separately; see [`crate::envelope`].

use serde::Serialize;
use serde_json::Value;

/// One step of a generated plan, as it appears on the wire (§3 PlanStep, §6 `plan_generated`).
#[derive(Clone, Debug, Serialize)]
pub struct PlanStepWire {
    pub step: u32,
    pub thought: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub status: String,
}

/// A citation target surfaced to the client for UI linking (§3 Reference).
#[derive(Clone, Debug, Serialize)]
pub struct ReferenceWire {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub value: String,
    pub metadata: Value,
}

/// Core event: the tagged union streamed upstream by C9 (§3, §6).
///
/// Every variant is wrapped by [`crate::envelope::EventEnvelope`], which adds
/// `step_id`, `thread_id`, and `ts` at serialization time rather than per-variant,
/// matching the wire shape `{"type": "...", "timestamp": "...", ...fields}`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// A pipeline phase transition (e.g. planning, executing, synthesizing).
    PhaseUpdate {
        phase: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        percentage: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The full plan produced by the Planner (C7).
    PlanGenerated { plan: Vec<PlanStepWire> },
    /// A raw reasoning token emitted by the Planner before `plan_generated`.
    PlanToken { token: String },
    /// A plan step has begun executing.
    StepExecuting { step: u32 },
    /// A plan step finished (success or failure).
    StepCompleted {
        step: u32,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result_summary: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_id: Option<u32>,
        execution_time: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The Synthesizer has started streaming an answer.
    SynthesizingStart,
    /// One contiguous chunk of assistant or synthesized text.
    TextChunk { text_id: String, text: String },
    /// A tool invocation was dispatched.
    ToolUse {
        call_id: String,
        name: String,
        arguments: Value,
    },
    /// A tool invocation returned.
    ToolResult {
        call_id: String,
        name: String,
        success: bool,
        summary: String,
    },
    /// Deduplicated references gathered across the request, emitted exactly once.
    References { references: Vec<ReferenceWire> },
    /// A `[cite: n, m, ...]` span found in synthesized text.
    CitationData {
        target_text_id: String,
        source_ids: Vec<u32>,
    },
    /// One worker-pool segment task started (C8).
    TaskStart { segment_id: String },
    /// One worker-pool segment task completed successfully (C8).
    TaskComplete { segment_id: String, summary: String },
    /// One worker-pool segment task failed (C8).
    TaskFailed { segment_id: String, error: String },
    /// Terminal summary of a deep-research run (C8).
    ExecutionComplete {
        total: u32,
        successful: u32,
        failed: u32,
    },
    /// Terminal event on success. Exactly one of `stream_end`/`error`/`interrupt` per request (P6).
    StreamEnd,
    /// Terminal event on failure.
    Error {
        error_message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    /// Terminal event for this call; execution is paused pending `Resume`.
    Interrupt {
        requires_approval: bool,
        thread_id: String,
    },
}

impl CoreEvent {
    /// Serializes the type-tagged payload (without envelope fields).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// True for the three terminal variants (P6: at-most-one terminal event per request).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoreEvent::StreamEnd | CoreEvent::Error { .. } | CoreEvent::Interrupt { .. }
        )
    }
}
