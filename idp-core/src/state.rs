//! Shared data-model types that flow between components (spec §3), beyond
//! [`crate::message::Message`] and [`crate::agent_context::AgentContext`], which
//! live in their own modules.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed schema for a tool, as advertised by [`crate::tool::ToolRegistry::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub supports_agent_context: bool,
}

/// A pointer to an external artifact (document, image, URL) surfaced for UI linking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Document,
    Image,
    Url,
    ShowDocumentPanel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ReferenceType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub display_name: Option<String>,
    /// URI the reference points at.
    pub value: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Reference {
    /// Parses the wire format `"<title> : <url>"` (spec §6). Without the
    /// ` : ` separator the whole string becomes both `title` and `value`.
    pub fn from_title_url_string(id: impl Into<String>, raw: &str, tool_name: &str) -> Self {
        let (title, value) = match raw.split_once(" : ") {
            Some((t, u)) => (t.trim().to_string(), u.trim().to_string()),
            None => (raw.to_string(), raw.to_string()),
        };
        let kind = if is_image_url(&value) {
            ReferenceType::Image
        } else {
            ReferenceType::Document
        };
        let mut metadata = HashMap::new();
        metadata.insert("tool".to_string(), Value::String(tool_name.to_string()));
        metadata.insert(
            "source".to_string(),
            Value::String("tool_execution".to_string()),
        );
        Reference {
            id: id.into(),
            kind,
            title,
            display_name: None,
            value,
            metadata,
        }
    }
}

/// URL path suffix check used both by [`Reference::from_title_url_string`] and by
/// attachment normalization (spec §4.1 normalization rules).
pub fn is_image_url(url: &str) -> bool {
    const IMAGE_SUFFIXES: [&str; 7] = ["png", "jpg", "jpeg", "gif", "bmp", "webp", "svg"];
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit_once('.') {
        Some((_, ext)) => IMAGE_SUFFIXES.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// An inline binary payload provided to the model as input content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    /// base64-encoded payload.
    pub data: String,
}

impl Attachment {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// A single tool invocation requested within an assistant turn (ReAct state,
/// distinct from [`crate::message::ToolCallRequest`] which is the wire form
/// embedded in a `Message::Assistant`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Outcome of a single tool dispatch (spec §3 ToolResult), already normalized
/// by the registry: truncated text, extracted references/attachments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub execution_time_s: f64,
}

impl ToolResult {
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        ToolResult {
            success: false,
            message: String::new(),
            data: HashMap::new(),
            references: Vec::new(),
            attachments: Vec::new(),
            error: Some(error),
            execution_time_s: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// One step of an [`ExecutionPlan`] (spec §3 PlanStep).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: u32,
    pub thought: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: HashMap<String, Value>,
    pub status: PlanStepStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_id: Option<u32>,
}

/// A structured plan produced by the Planner (C7), consumed by the Executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan: Vec<PlanStep>,
    pub total_steps: u32,
    pub created_at: String,
}

impl ExecutionPlan {
    /// Renumbers steps to `1..=len` in insertion order and sets `total_steps`
    /// accordingly (spec P7: `total_steps = len(plan)`, `plan[i].step = i+1`).
    pub fn new(mut plan: Vec<PlanStep>, created_at: impl Into<String>) -> Self {
        for (i, step) in plan.iter_mut().enumerate() {
            step.step = (i + 1) as u32;
        }
        let total_steps = plan.len() as u32;
        ExecutionPlan {
            plan,
            total_steps,
            created_at: created_at.into(),
        }
    }
}

/// Outcome of executing one [`PlanStep`] (spec §3 ExecutionResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub step_number: u32,
    pub tool_name: String,
    pub success: bool,
    #[serde(default)]
    pub result_data: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub execution_time_s: f64,
    pub result_summary: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Planning,
    Executing,
    Synthesizing,
    Completed,
    Error,
}

/// Per-request state threaded through the Plan-Execute-Respond pipeline (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchState {
    pub query: String,
    pub phase: SearchPhase,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub results: Vec<ExecutionResult>,
    pub current_step: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub index_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub segment_id: Option<String>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    /// Monotonic counter backing `source_id` assignment (invariant iv).
    next_source_id: u32,
}

impl SearchState {
    pub fn new(query: impl Into<String>, started_at: impl Into<String>) -> Self {
        SearchState {
            query: query.into(),
            phase: SearchPhase::Planning,
            plan: None,
            results: Vec::new(),
            current_step: 0,
            index_id: None,
            document_id: None,
            segment_id: None,
            started_at: started_at.into(),
            completed_at: None,
            error: None,
            next_source_id: 1,
        }
    }

    /// Assigns and returns the next monotonic `source_id` for this state.
    pub fn assign_source_id(&mut self) -> u32 {
        let id = self.next_source_id;
        self.next_source_id += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct JobProgress {
    pub completed_segments: u32,
    pub failed_segments: u32,
    pub percentage: f64,
}

/// A deep-research job spanning many document segments (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchJob {
    pub job_id: String,
    pub document_id: String,
    pub query: String,
    pub total_pages: u32,
    pub total_segments: u32,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<String>,
}

impl ResearchJob {
    /// Invariant (v): `completed_segments + |failed_segments| ≤ total_segments`.
    pub fn progress_within_bounds(&self) -> bool {
        self.progress.completed_segments + self.progress.failed_segments <= self.total_segments
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResearchProgress {
    pub total_pages: u32,
    pub completed_pages: u32,
    pub failed_pages: Vec<String>,
    pub current_batch: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ResearchCost {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub dollars_est: f64,
}

/// Running state accumulated while a [`ResearchJob`] executes (C8).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResearchMemory {
    pub progress: ResearchProgress,
    pub cost: ResearchCost,
}

/// A single finding extracted from analyzing one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceFinding {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSection {
    pub title: String,
}

/// One segment's analysis record, keyed by `(job_id, segment_id)` in
/// [`crate::deep_research::EvidenceStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub findings: Vec<EvidenceFinding>,
    pub sections: Vec<EvidenceSection>,
    pub summary: String,
    pub page_index: u32,
}

/// Outcome of analyzing one segment (spec §4.8 `SegmentResult{segment_id,
/// success, summary|error}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentResult {
    pub segment_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Final coverage/cost rollup for a completed research job (SPEC_FULL §4 C8 supplement).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchStats {
    pub total_pages: u32,
    pub completed_pages: u32,
    pub failed_pages: u32,
    pub cost: ResearchCost,
}

/// The value returned by `Stream(mode=deep_research, ...)` once the job
/// reaches a terminal status (SPEC_FULL §4 C8 supplement, grounded in
/// `original_source/.../deep_research_agent/agent.py`'s `research()` return shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub success: bool,
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub report_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub markdown_path: Option<String>,
    pub summary: String,
    pub stats: ResearchStats,
}

/// Per-thread ReAct loop state (C6), grounded in the teacher's `ReActState`
/// shape (`messages, tool_calls, tool_results, turn_count, approval_result,
/// usage`), extended with the fields this spec's summarization/reference/
/// interrupt handling requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReActState {
    pub messages: Vec<crate::message::Message>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    pub turn_count: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub approval_result: Option<bool>,
    /// References aggregated across this turn's tool results; cleared at the
    /// end of each request via `Checkpointer::update_state` (spec §4.4).
    #[serde(default)]
    pub tool_references: Vec<Reference>,
    #[serde(default)]
    pub needs_summarization: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_summarization_at: Option<String>,
    pub message_count: u32,
    /// Compacted older history, combined across summarization rounds (spec
    /// §4.6 step 7, persisted state layout's `summary` field).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<String>,
    /// Carried so `Resume` can reconstruct an `AgentContext` without the
    /// caller resupplying request-scoping fields.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub index_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
}

impl ReActState {
    pub fn new() -> Self {
        ReActState {
            messages: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            turn_count: 0,
            approval_result: None,
            tool_references: Vec::new(),
            needs_summarization: false,
            last_summarization_at: None,
            message_count: 0,
            summary: None,
            index_id: None,
            session_id: None,
        }
    }
}

impl Default for ReActState {
    fn default() -> Self {
        Self::new()
    }
}
