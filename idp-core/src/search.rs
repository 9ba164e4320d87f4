//! Planner / Executor / Synthesizer (C7): the Plan-Execute-Respond pipeline
//! driven by a [`SearchState`] (spec §4.7).
//!
//! Grounded in `original_source/.../agent/search_agent/{planner,executor,
//! synthesizer}.py` (the plain-class trio; the LangGraph-node and
//! Strands-workflow variants were cross-checked but not ported, per the
//! resolved Open Question — see DESIGN.md). The three stages are plain
//! structs driven sequentially by [`SearchPipeline`], following the same
//! "one fixed loop shape, no generic graph" approach as [`crate::react`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent_context::AgentContext;
use crate::config::CoreConfig;
use crate::error::AgentError;
use crate::health::HealthChecker;
use crate::llm::{LlmClient, LlmRequest, ToolChoiceMode};
use crate::message::Message;
use crate::prompts::PromptRegistry;
use crate::state::{
    ExecutionPlan, ExecutionResult, PlanStep, PlanStepStatus, SearchPhase, SearchState, ToolSpec,
};
use crate::stream::{MessageChunk, StreamWriter};
use crate::tool::ToolRegistry;

use stream_event::{CoreEvent, PlanStepWire};

/// Inter-step pause applied by the executor "for UX smoothing" (executor.py).
const INTER_STEP_DELAY: Duration = Duration::from_millis(100);

/// `[cite: N]` / `[cite: N, M, ...]` (synthesizer.py's `CITATION_PATTERN`).
static CITATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[cite:\s*(\d+(?:,\s*\d+)*)\]").unwrap());
const FALLBACK_KEYWORDS: [&str; 4] = ["search", "find", "query", "hybrid"];

/// Input to one `Stream(mode=plan_execute, ...)` call (spec §6).
pub struct SearchInput {
    pub thread_id: String,
    pub session_id: String,
    pub index_id: String,
    pub document_id: Option<String>,
    pub segment_id: Option<String>,
    pub query: String,
}

/// Produces an [`ExecutionPlan`] from a query and the currently offered
/// toolset (planner.py `create_plan`).
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptRegistry>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptRegistry>) -> Self {
        Planner { llm, prompts }
    }

    /// Asks the model for a JSON plan; on parse failure or an empty step list,
    /// falls back to a single keyword-matched tool call (planner.py
    /// `_create_fallback_plan`) rather than surfacing an error.
    pub async fn plan(
        &self,
        query: &str,
        available_tools: &[ToolSpec],
        writer: &StreamWriter,
    ) -> Result<ExecutionPlan, AgentError> {
        let mut vars = HashMap::new();
        vars.insert("TOOLS".to_string(), describe_tools(available_tools));
        vars.insert("QUERY".to_string(), query.to_string());
        let rendered = self.prompts.render("planner", &vars)?;

        let messages = vec![Message::system(rendered.system_prompt), Message::user(rendered.instruction)];
        let request = LlmRequest {
            messages: &messages,
            tools: &[],
            max_tokens: 2048,
            temperature: 0.2,
            tool_choice: ToolChoiceMode::None,
        };

        let plan = match self.llm.invoke(request).await {
            Ok(response) => {
                if !response.content.is_empty() {
                    writer
                        .emit(CoreEvent::PlanToken {
                            token: response.content.clone(),
                        })
                        .await;
                }
                parse_plan_response(&response.content).or_else(|| fallback_plan(query, available_tools))
            }
            Err(_) => fallback_plan(query, available_tools),
        };

        let plan = plan.ok_or_else(|| {
            AgentError::ToolUnavailable("no tools available to build a fallback plan".to_string())
        })?;

        writer
            .emit(CoreEvent::PlanGenerated {
                plan: plan.plan.iter().map(to_wire_step).collect(),
            })
            .await;
        Ok(plan)
    }
}

fn describe_tools(tools: &[ToolSpec]) -> String {
    tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts the first top-level `{...}` object and parses a `{"plan": [...]}`
/// shape out of it, skipping any step missing `tool_name` (planner.py
/// `_extract_json_from_response` + `_create_execution_plan`). Returns `None`
/// if no JSON object is found, it doesn't parse, or no valid steps remain.
fn parse_plan_response(content: &str) -> Option<ExecutionPlan> {
    let json_str = extract_json_object(content)?;
    let parsed: Value = serde_json::from_str(json_str).ok()?;
    let raw_steps = parsed.get("plan")?.as_array()?;

    let mut steps = Vec::new();
    for step_val in raw_steps {
        let Some(obj) = step_val.as_object() else { continue };
        let Some(tool_name) = obj.get("tool_name").and_then(Value::as_str) else {
            continue;
        };
        let thought = obj.get("thought").and_then(Value::as_str).unwrap_or("").to_string();
        let tool_input = obj
            .get("tool_input")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        steps.push(PlanStep {
            step: 0, // renumbered by ExecutionPlan::new (P7)
            thought,
            tool_name: tool_name.to_string(),
            tool_input,
            status: PlanStepStatus::Pending,
            result_summary: None,
            source_id: None,
        });
    }

    if steps.is_empty() {
        return None;
    }
    Some(ExecutionPlan::new(steps, now_rfc3339()))
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// First tool whose name contains a search-like keyword, else the first
/// available tool, else `None` (planner.py `_create_fallback_plan`). The
/// placeholder `{index_id}`/etc. are resolved later by the executor's
/// template substitution pass, matching the Python's literal placeholder.
fn fallback_plan(query: &str, available_tools: &[ToolSpec]) -> Option<ExecutionPlan> {
    if available_tools.is_empty() {
        return None;
    }
    let chosen = available_tools
        .iter()
        .find(|t| {
            let name = t.name.to_lowercase();
            FALLBACK_KEYWORDS.iter().any(|kw| name.contains(kw))
        })
        .unwrap_or(&available_tools[0]);

    let mut tool_input = HashMap::new();
    tool_input.insert("query".to_string(), Value::String(query.to_string()));
    if FALLBACK_KEYWORDS.iter().any(|kw| chosen.name.to_lowercase().contains(kw)) {
        tool_input.insert("index_id".to_string(), Value::String("{index_id}".to_string()));
    }

    let step = PlanStep {
        step: 1,
        thought: format!("Fallback: directly query using {}", chosen.name),
        tool_name: chosen.name.clone(),
        tool_input,
        status: PlanStepStatus::Pending,
        result_summary: None,
        source_id: None,
    };
    Some(ExecutionPlan::new(vec![step], now_rfc3339()))
}

fn to_wire_step(step: &PlanStep) -> PlanStepWire {
    PlanStepWire {
        step: step.step,
        thought: step.thought.clone(),
        tool_name: step.tool_name.clone(),
        tool_input: serde_json::to_value(&step.tool_input).unwrap_or(Value::Null),
        status: status_label(step.status).to_string(),
    }
}

fn status_label(status: PlanStepStatus) -> &'static str {
    match status {
        PlanStepStatus::Pending => "pending",
        PlanStepStatus::Executing => "executing",
        PlanStepStatus::Completed => "completed",
        PlanStepStatus::Failed => "failed",
    }
}

/// Dispatches an [`ExecutionPlan`] step by step through [`ToolRegistry`],
/// never aborting on a single step's failure (executor.py `execute_plan`).
pub struct Executor {
    tools: Arc<ToolRegistry>,
}

impl Executor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Executor { tools }
    }

    /// Runs every step of `plan` against `search_state`, which accumulates
    /// `results` and owns the monotonic `source_id` counter (invariant iv).
    /// Fails with [`AgentError::ToolUnavailable`] (`no_successful_results`)
    /// only if every step failed.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        search_state: &mut SearchState,
        ctx: &AgentContext,
        writer: &StreamWriter,
    ) -> Result<(), AgentError> {
        search_state.phase = SearchPhase::Executing;
        let mut results = Vec::with_capacity(plan.plan.len());
        let mut any_success = false;

        for (i, step) in plan.plan.iter().enumerate() {
            search_state.current_step = step.step;
            writer.emit(CoreEvent::StepExecuting { step: step.step }).await;

            let source_id = search_state.assign_source_id();
            let started = Instant::now();
            let tool_input = prepare_tool_input(&step.tool_input, search_state, ctx);
            let args = Value::Object(tool_input.into_iter().collect());

            let result = match self.tools.invoke(&step.tool_name, args, ctx).await {
                Ok(tool_result) => {
                    any_success |= tool_result.success;
                    ExecutionResult {
                        step_number: step.step,
                        tool_name: step.tool_name.clone(),
                        success: tool_result.success,
                        result_summary: create_result_summary(&step.tool_name, &tool_result),
                        result_data: tool_result.data,
                        source_id: Some(source_id),
                        error: tool_result.error,
                        execution_time_s: started.elapsed().as_secs_f64(),
                    }
                }
                Err(err) => ExecutionResult {
                    step_number: step.step,
                    tool_name: step.tool_name.clone(),
                    success: false,
                    result_summary: format!("{} executed successfully", step.tool_name),
                    result_data: HashMap::new(),
                    source_id: Some(source_id),
                    error: Some(err.to_string()),
                    execution_time_s: started.elapsed().as_secs_f64(),
                },
            };

            writer
                .emit(CoreEvent::StepCompleted {
                    step: step.step,
                    success: result.success,
                    result_summary: Some(result.result_summary.clone()),
                    source_id: result.source_id,
                    execution_time: result.execution_time_s,
                    error: result.error.clone(),
                })
                .await;
            results.push(result);

            if i + 1 < plan.plan.len() {
                tokio::time::sleep(INTER_STEP_DELAY).await;
            }
        }

        search_state.results = results;
        if !any_success {
            search_state.phase = SearchPhase::Error;
            search_state.error = Some("no_successful_results".to_string());
            return Err(AgentError::ToolUnavailable("no_successful_results".to_string()));
        }
        search_state.phase = SearchPhase::Synthesizing;
        Ok(())
    }
}

/// Injects `index_id`/`document_id`/`segment_id` defaults (only when absent)
/// then substitutes `{query}`/`{index_id}`/`{document_id}`/`{segment_id}`
/// literally inside every string value, in that order (executor.py
/// `_prepare_tool_input` + `_process_template_variables`).
fn prepare_tool_input(
    template_input: &HashMap<String, Value>,
    search_state: &SearchState,
    ctx: &AgentContext,
) -> HashMap<String, Value> {
    let mut input = template_input.clone();
    input
        .entry("index_id".to_string())
        .or_insert_with(|| Value::String(ctx.index_id.clone()));
    if let Some(doc) = search_state.document_id.clone().or_else(|| ctx.document_id.clone()) {
        input.entry("document_id".to_string()).or_insert(Value::String(doc));
    }
    if let Some(seg) = search_state.segment_id.clone().or_else(|| ctx.segment_id.clone()) {
        input.entry("segment_id".to_string()).or_insert(Value::String(seg));
    }

    let document_id = search_state.document_id.clone().unwrap_or_default();
    let segment_id = search_state.segment_id.clone().unwrap_or_default();
    for value in input.values_mut() {
        if let Value::String(s) = value {
            *s = s.replace("{query}", &search_state.query);
            *s = s.replace("{index_id}", &ctx.index_id);
            *s = s.replace("{document_id}", &document_id);
            *s = s.replace("{segment_id}", &segment_id);
        }
    }
    input
}

/// Exact branch order from executor.py `_create_result_summary`.
fn create_result_summary(tool_name: &str, result: &crate::state::ToolResult) -> String {
    if let Some(list) = result.data.get("results").and_then(Value::as_array) {
        return format!("{tool_name} found {} results", list.len());
    }
    if let Some(content) = result.data.get("content") {
        let text = content.as_str().map(str::to_string).unwrap_or_else(|| content.to_string());
        return format!("{tool_name} extracted {} characters of content", text.chars().count());
    }
    if result.data.contains_key("analysis") {
        return format!("{tool_name} completed analysis");
    }
    if let Some(summary) = result.data.get("summary") {
        let text = summary.as_str().map(str::to_string).unwrap_or_else(|| summary.to_string());
        return format!("{tool_name} generated {} character summary", text.chars().count());
    }
    format!("{tool_name} executed successfully")
}

/// Streams a cited answer from the successful execution results
/// (synthesizer.py `synthesize_answer_stream`).
pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptRegistry>,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptRegistry>) -> Self {
        Synthesizer { llm, prompts }
    }

    /// Streams `text_chunk`/`citation_data` events under one stable `text_id`,
    /// then marks `search_state.phase = completed`. On model failure, marks
    /// `phase = error` and propagates (the caller emits `error`, not `stream_end`).
    pub async fn synthesize(&self, search_state: &mut SearchState, writer: &StreamWriter) -> Result<String, AgentError> {
        writer.emit(CoreEvent::SynthesizingStart).await;

        let mut vars = HashMap::new();
        vars.insert("SOURCES".to_string(), format_sources(&search_state.results));
        vars.insert("QUERY".to_string(), search_state.query.clone());
        let rendered = self.prompts.render("synthesizer", &vars)?;
        let messages = vec![Message::system(rendered.system_prompt), Message::user(rendered.instruction)];

        let (tx, rx) = mpsc::channel(64);
        let text_id = uuid::Uuid::new_v4().to_string();
        let consumer = tokio::spawn(consume_chunks(writer.clone(), text_id, rx));

        let request = LlmRequest {
            messages: &messages,
            tools: &[],
            max_tokens: 2048,
            temperature: 0.3,
            tool_choice: ToolChoiceMode::None,
        };
        let outcome = self.llm.invoke_stream(request, Some(tx)).await;
        let full_text = consumer.await.map_err(AgentError::internal)?;

        match outcome {
            Ok(_) => {
                search_state.phase = SearchPhase::Completed;
                search_state.completed_at = Some(now_rfc3339());
                Ok(full_text)
            }
            Err(err) => {
                search_state.phase = SearchPhase::Error;
                search_state.error = Some(err.to_string());
                Err(err)
            }
        }
    }
}

/// Buffers incoming text until a natural break, emits `text_chunk` +
/// `citation_data` for each flush, then re-scans the full accumulated text
/// for any citation split across a chunk boundary (synthesizer.py
/// `_extract_final_citations`).
async fn consume_chunks(writer: StreamWriter, text_id: String, mut rx: mpsc::Receiver<MessageChunk>) -> String {
    let mut full_text = String::new();
    let mut delta_buffer = String::new();
    let mut citations_emitted = 0usize;

    while let Some(chunk) = rx.recv().await {
        let delta = detect_delta(&full_text, &chunk.content);
        if delta.is_empty() {
            continue;
        }
        full_text.push_str(&delta);
        delta_buffer.push_str(&delta);
        if should_flush(&delta_buffer) {
            citations_emitted += flush_chunk(&writer, &text_id, &mut delta_buffer).await;
        }
    }
    if !delta_buffer.is_empty() {
        citations_emitted += flush_chunk(&writer, &text_id, &mut delta_buffer).await;
    }

    let all_citations: Vec<_> = CITATION_RE.captures_iter(&full_text).collect();
    for cap in all_citations.iter().skip(citations_emitted) {
        writer
            .emit(CoreEvent::CitationData {
                target_text_id: text_id.clone(),
                source_ids: parse_source_ids(&cap[1]),
            })
            .await;
    }

    full_text
}

/// Cumulative-vs-delta detection: a provider that resends the running total
/// is recognized by prefix containment; otherwise `incoming` is itself the delta.
fn detect_delta(full_text: &str, incoming: &str) -> String {
    if incoming.len() >= full_text.len() && incoming.starts_with(full_text) {
        incoming[full_text.len()..].to_string()
    } else {
        incoming.to_string()
    }
}

fn should_flush(buffer: &str) -> bool {
    buffer.len() >= 50
        || buffer.contains(['.', '!', '?'])
        || buffer.contains("\n\n")
        || buffer.contains("##")
        || buffer.matches(' ').count() >= 8
}

/// Strips citation tags from `buffer`, emits `text_chunk` (if anything
/// remains) then one `citation_data` per match in order, and clears the
/// buffer. Returns the number of citations emitted.
async fn flush_chunk(writer: &StreamWriter, text_id: &str, buffer: &mut String) -> usize {
    let citations: Vec<String> = CITATION_RE.captures_iter(buffer).map(|c| c[1].to_string()).collect();
    let stripped = CITATION_RE.replace_all(buffer, "").to_string();
    if !stripped.is_empty() {
        writer
            .emit(CoreEvent::TextChunk {
                text_id: text_id.to_string(),
                text: stripped,
            })
            .await;
    }
    for ids in &citations {
        writer
            .emit(CoreEvent::CitationData {
                target_text_id: text_id.to_string(),
                source_ids: parse_source_ids(ids),
            })
            .await;
    }
    let count = citations.len();
    buffer.clear();
    count
}

fn parse_source_ids(s: &str) -> Vec<u32> {
    s.split(',').filter_map(|p| p.trim().parse::<u32>().ok()).collect()
}

/// `### Source ID <n>` sections over the successful results (synthesizer.py
/// `_format_execution_results`), truncated per-source the way the Python does.
fn format_sources(results: &[ExecutionResult]) -> String {
    results
        .iter()
        .filter(|r| r.success)
        .map(|r| format!("### Source ID {}\n{}", r.source_id.unwrap_or(0), summarize_result_data(r)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn summarize_result_data(result: &ExecutionResult) -> String {
    if let Some(list) = result.result_data.get("results").and_then(Value::as_array) {
        return list
            .iter()
            .take(5)
            .enumerate()
            .map(|(i, item)| {
                let title = item.get("title").and_then(Value::as_str).unwrap_or("untitled");
                let content = item.get("content").and_then(Value::as_str).unwrap_or("");
                let truncated: String = content.chars().take(200).collect();
                format!("{}. {title}: {truncated}...", i + 1)
            })
            .collect::<Vec<_>>()
            .join("\n");
    }
    if let Some(content) = result.result_data.get("content").and_then(Value::as_str) {
        return content.chars().take(1000).collect();
    }
    serde_json::to_string(&result.result_data)
        .unwrap_or_default()
        .chars()
        .take(1000)
        .collect()
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Drives Planner → Executor → Synthesizer behind `Stream(mode=plan_execute)`.
pub struct SearchPipeline {
    planner: Planner,
    executor: Executor,
    synthesizer: Synthesizer,
    tools: Arc<ToolRegistry>,
    health: Arc<HealthChecker>,
    config: CoreConfig,
}

impl SearchPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        health: Arc<HealthChecker>,
        prompts: Arc<PromptRegistry>,
        config: CoreConfig,
    ) -> Self {
        SearchPipeline {
            planner: Planner::new(llm.clone(), prompts.clone()),
            executor: Executor::new(tools.clone()),
            synthesizer: Synthesizer::new(llm, prompts),
            tools,
            health,
            config,
        }
    }

    /// Runs one Plan-Execute-Respond request to completion (spec S2), emitting
    /// exactly one terminal event (P6).
    pub async fn stream(&self, input: SearchInput, writer: &StreamWriter) -> Result<(), AgentError> {
        let mut ctx = AgentContext::new(
            input.index_id.clone(),
            input.thread_id.clone(),
            input.session_id.clone(),
            input.query.clone(),
        );
        if let Some(doc) = &input.document_id {
            ctx = ctx.with_document(doc.clone());
        }
        if let Some(seg) = &input.segment_id {
            ctx = ctx.with_segment(seg.clone(), 0);
        }

        let mut search_state = SearchState::new(input.query, now_rfc3339());
        search_state.index_id = Some(ctx.index_id.clone());
        search_state.document_id = ctx.document_id.clone();
        search_state.segment_id = ctx.segment_id.clone();

        writer
            .emit(CoreEvent::PhaseUpdate {
                phase: "planning".to_string(),
                percentage: None,
                message: None,
            })
            .await;

        let available_tools = if self.health.is_healthy_within(self.config.mcp_health_check_timeout).await {
            self.tools.list()
        } else {
            Vec::new()
        };

        let outcome = self.run(&mut search_state, &available_tools, &ctx, writer).await;
        self.finish(outcome, writer).await
    }

    async fn run(
        &self,
        search_state: &mut SearchState,
        available_tools: &[ToolSpec],
        ctx: &AgentContext,
        writer: &StreamWriter,
    ) -> Result<String, AgentError> {
        let plan = self.planner.plan(&search_state.query, available_tools, writer).await?;
        search_state.plan = Some(plan.clone());

        self.executor.execute(&plan, search_state, ctx, writer).await?;
        self.synthesizer.synthesize(search_state, writer).await
    }

    async fn finish(&self, outcome: Result<String, AgentError>, writer: &StreamWriter) -> Result<(), AgentError> {
        match outcome {
            Ok(_) => {
                writer.emit(CoreEvent::StreamEnd).await;
                Ok(())
            }
            Err(err) => {
                writer
                    .emit(CoreEvent::Error {
                        error_message: err.to_string(),
                        error_code: Some(search_error_code(&err)),
                    })
                    .await;
                Ok(())
            }
        }
    }
}

fn search_error_code(err: &AgentError) -> String {
    match err {
        AgentError::ToolUnavailable(msg) if msg == "no_successful_results" => "no_successful_results".to_string(),
        AgentError::ToolUnavailable(_) => "tool_unavailable".to_string(),
        AgentError::MissingVariable(_) => "missing_variable".to_string(),
        AgentError::NotFound(_) => "not_found".to_string(),
        AgentError::TransportError(_) => "transport_error".to_string(),
        AgentError::ModelTimeout(_) => "model_timeout".to_string(),
        _ => "internal_error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ToolLister;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn tool_spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: json!({}),
            supports_agent_context: false,
        }
    }

    /// **Scenario**: extract_json_object finds the JSON object amid surrounding prose.
    #[test]
    fn extract_json_object_ignores_surrounding_prose() {
        let text = "Here is the plan:\n{\"plan\": [{\"tool_name\": \"x\"}]}\nThanks!";
        let json = extract_json_object(text).unwrap();
        assert!(json.starts_with('{') && json.ends_with('}'));
    }

    /// **Scenario**: a step missing `tool_name` is skipped rather than failing the whole parse.
    #[test]
    fn parse_plan_response_skips_steps_missing_tool_name() {
        let content = r#"{"plan": [{"thought": "no tool"}, {"tool_name": "hybrid_search", "thought": "ok"}]}"#;
        let plan = parse_plan_response(content).unwrap();
        assert_eq!(plan.plan.len(), 1);
        assert_eq!(plan.plan[0].tool_name, "hybrid_search");
        assert_eq!(plan.plan[0].step, 1);
    }

    /// **Scenario**: an unparseable response yields None, triggering the fallback plan.
    #[test]
    fn parse_plan_response_returns_none_for_garbage() {
        assert!(parse_plan_response("not json at all").is_none());
    }

    /// **Scenario**: fallback_plan prefers a tool whose name matches a search keyword.
    #[test]
    fn fallback_plan_prefers_search_keyword_tool() {
        let tools = vec![tool_spec("get_document_analysis"), tool_spec("hybrid_search")];
        let plan = fallback_plan("what is this?", &tools).unwrap();
        assert_eq!(plan.plan[0].tool_name, "hybrid_search");
        assert_eq!(
            plan.plan[0].tool_input.get("index_id").and_then(Value::as_str),
            Some("{index_id}")
        );
    }

    /// **Scenario**: with no keyword match, fallback_plan uses the first available tool
    /// and omits index_id entirely.
    #[test]
    fn fallback_plan_uses_first_tool_when_no_keyword_matches() {
        let tools = vec![tool_spec("get_document_analysis")];
        let plan = fallback_plan("what is this?", &tools).unwrap();
        assert_eq!(plan.plan[0].tool_name, "get_document_analysis");
        assert!(plan.plan[0].tool_input.get("index_id").is_none());
    }

    /// **Scenario**: fallback_plan with no tools at all returns None.
    #[test]
    fn fallback_plan_with_no_tools_returns_none() {
        assert!(fallback_plan("q", &[]).is_none());
    }

    fn ctx() -> AgentContext {
        AgentContext::new("idx-1", "t1", "s1", "q")
    }

    /// **Scenario**: prepare_tool_input injects index_id only when absent and substitutes
    /// `{query}`/`{index_id}` placeholders inside string values.
    #[test]
    fn prepare_tool_input_injects_defaults_and_substitutes_placeholders() {
        let mut template = HashMap::new();
        template.insert("query".to_string(), Value::String("{query}".to_string()));
        template.insert("index_id".to_string(), Value::String("{index_id}".to_string()));
        let state = SearchState::new("summarize doc X", now_rfc3339());

        let input = prepare_tool_input(&template, &state, &ctx());
        assert_eq!(input.get("query").and_then(Value::as_str), Some("summarize doc X"));
        assert_eq!(input.get("index_id").and_then(Value::as_str), Some("idx-1"));
    }

    /// **Scenario**: an already-present document_id is not overwritten by the default injector.
    #[test]
    fn prepare_tool_input_does_not_overwrite_existing_document_id() {
        let mut template = HashMap::new();
        template.insert("document_id".to_string(), Value::String("explicit-doc".to_string()));
        let mut state = SearchState::new("q", now_rfc3339());
        state.document_id = Some("state-doc".to_string());

        let input = prepare_tool_input(&template, &state, &ctx());
        assert_eq!(input.get("document_id").and_then(Value::as_str), Some("explicit-doc"));
    }

    fn tool_result(data: serde_json::Map<String, Value>) -> crate::state::ToolResult {
        crate::state::ToolResult {
            success: true,
            message: String::new(),
            data: data.into_iter().collect(),
            references: Vec::new(),
            attachments: Vec::new(),
            error: None,
            execution_time_s: 0.0,
        }
    }

    /// **Scenario**: result-summary branch order matches executor.py exactly:
    /// results > content > analysis > summary > generic success.
    #[test]
    fn create_result_summary_follows_exact_branch_order() {
        let results = tool_result(json!({"results": [1, 2, 3]}).as_object().unwrap().clone());
        assert_eq!(create_result_summary("hybrid_search", &results), "hybrid_search found 3 results");

        let content = tool_result(json!({"content": "hello"}).as_object().unwrap().clone());
        assert_eq!(
            create_result_summary("get_document_analysis", &content),
            "get_document_analysis extracted 5 characters of content"
        );

        let analysis = tool_result(json!({"analysis": {"k": "v"}}).as_object().unwrap().clone());
        assert_eq!(create_result_summary("analyzer", &analysis), "analyzer completed analysis");

        let summary = tool_result(json!({"summary": "abcde"}).as_object().unwrap().clone());
        assert_eq!(create_result_summary("summarizer", &summary), "summarizer generated 5 character summary");

        let generic = tool_result(serde_json::Map::new());
        assert_eq!(create_result_summary("echo", &generic), "echo executed successfully");
    }

    /// **Scenario**: should_flush triggers on length, punctuation, double newline, or
    /// space-count thresholds, matching synthesizer.py's buffering rule.
    #[test]
    fn should_flush_matches_threshold_rules() {
        assert!(!should_flush("short"));
        assert!(should_flush(&"a".repeat(50)));
        assert!(should_flush("ends with a period."));
        assert!(should_flush("paragraph break\n\nhere"));
        assert!(should_flush("one two three four five six seven eight"));
    }

    /// **Scenario**: flush_chunk strips citation tags, emits text_chunk for the remainder,
    /// then one citation_data per match in order.
    #[tokio::test]
    async fn flush_chunk_strips_citations_and_emits_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let writer = StreamWriter::new(tx, "t1", tokio_util::sync::CancellationToken::new());
        let mut buffer = "Topic A [cite: 1] and topic B [cite: 1, 2].".to_string();

        let count = flush_chunk(&writer, "text-1", &mut buffer).await;
        assert_eq!(count, 2);
        assert!(buffer.is_empty());

        let text_ev = rx.recv().await.unwrap();
        match text_ev {
            CoreEvent::TextChunk { text, .. } => assert_eq!(text, "Topic A  and topic B ."),
            other => panic!("expected text_chunk, got {other:?}"),
        }
        let cite1 = rx.recv().await.unwrap();
        assert!(matches!(cite1, CoreEvent::CitationData { source_ids, .. } if source_ids == vec![1]));
        let cite2 = rx.recv().await.unwrap();
        assert!(matches!(cite2, CoreEvent::CitationData { source_ids, .. } if source_ids == vec![1, 2]));
    }

    /// **Scenario**: detect_delta extracts only the new suffix from a cumulative provider,
    /// and treats a non-prefix-matching chunk as a delta in its own right.
    #[test]
    fn detect_delta_handles_cumulative_and_delta_providers() {
        assert_eq!(detect_delta("Hello", "Hello, world"), ", world");
        assert_eq!(detect_delta("", "Hello"), "Hello");
        assert_eq!(detect_delta("Hello", " world"), " world");
    }

    struct AnalysisTool;
    #[async_trait]
    impl Tool for AnalysisTool {
        fn name(&self) -> &str {
            "get_document_analysis"
        }
        fn spec(&self) -> ToolSpec {
            tool_spec("get_document_analysis")
        }
        async fn call(&self, _args: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
            Ok(json!({"content": "Doc X covers topic A and topic B."}))
        }
    }

    struct SearchTool;
    #[async_trait]
    impl Tool for SearchTool {
        fn name(&self) -> &str {
            "hybrid_search"
        }
        fn spec(&self) -> ToolSpec {
            tool_spec("hybrid_search")
        }
        async fn call(&self, _args: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
            Ok(json!({"results": [{"title": "A", "content": "topic A detail"}]}))
        }
    }

    struct FailingTool;
    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn spec(&self) -> ToolSpec {
            tool_spec("flaky")
        }
        async fn call(&self, _args: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
            Ok(json!({"success": false, "error": "upstream unavailable"}))
        }
    }

    struct AlwaysHealthy;
    #[async_trait]
    impl ToolLister for AlwaysHealthy {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, AgentError> {
            Ok(vec![AnalysisTool.spec(), SearchTool.spec()])
        }
    }

    /// Plan returned by the model: get_document_analysis then hybrid_search.
    struct PlanningLlm;
    #[async_trait]
    impl LlmClient for PlanningLlm {
        async fn invoke(&self, _request: LlmRequest<'_>) -> Result<crate::llm::LlmResponse, AgentError> {
            Ok(crate::llm::LlmResponse {
                content: r#"{"plan": [
                    {"step": 1, "thought": "overview", "tool_name": "get_document_analysis", "tool_input": {}},
                    {"step": 2, "thought": "details", "tool_name": "hybrid_search", "tool_input": {"query": "{query}"}}
                ]}"#
                    .to_string(),
                tool_calls: Vec::new(),
                usage: None,
            })
        }

        async fn invoke_stream(
            &self,
            _request: LlmRequest<'_>,
            chunk_tx: Option<mpsc::Sender<MessageChunk>>,
        ) -> Result<crate::llm::LlmResponse, AgentError> {
            let first = "Doc X covers topic A [cite: 1] ".to_string();
            let cumulative = format!("{first}and topic B [cite: 1, 2].");
            if let Some(tx) = chunk_tx {
                let _ = tx.send(MessageChunk { content: first }).await;
                let _ = tx
                    .send(MessageChunk {
                        content: cumulative.clone(),
                    })
                    .await;
            }
            Ok(crate::llm::LlmResponse {
                content: cumulative,
                tool_calls: Vec::new(),
                usage: None,
            })
        }
    }

    fn pipeline(llm: Arc<dyn LlmClient>) -> SearchPipeline {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(AnalysisTool));
        registry.register(Arc::new(SearchTool));
        let health = HealthChecker::new(Arc::new(AlwaysHealthy), Duration::from_secs(1));
        SearchPipeline::new(
            llm,
            Arc::new(registry),
            Arc::new(health),
            Arc::new(PromptRegistry::new()),
            CoreConfig::default(),
        )
    }

    fn event_kind(ev: &CoreEvent) -> &'static str {
        match ev {
            CoreEvent::PhaseUpdate { .. } => "phase_update",
            CoreEvent::PlanGenerated { .. } => "plan_generated",
            CoreEvent::PlanToken { .. } => "plan_token",
            CoreEvent::StepExecuting { .. } => "step_executing",
            CoreEvent::StepCompleted { .. } => "step_completed",
            CoreEvent::SynthesizingStart => "synthesizing_start",
            CoreEvent::TextChunk { .. } => "text_chunk",
            CoreEvent::ToolUse { .. } => "tool_use",
            CoreEvent::ToolResult { .. } => "tool_result",
            CoreEvent::References { .. } => "references",
            CoreEvent::CitationData { .. } => "citation_data",
            CoreEvent::TaskStart { .. } => "task_start",
            CoreEvent::TaskComplete { .. } => "task_complete",
            CoreEvent::TaskFailed { .. } => "task_failed",
            CoreEvent::ExecutionComplete { .. } => "execution_complete",
            CoreEvent::StreamEnd => "stream_end",
            CoreEvent::Error { .. } => "error",
            CoreEvent::Interrupt { .. } => "interrupt",
        }
    }

    /// **Scenario S2**: two-step plan, both succeed with source_id 1/2, synthesizer
    /// streams a cited answer; event-kind sequence matches spec.md's S2.
    #[tokio::test]
    async fn search_pipeline_matches_s2_sequence() {
        let pipeline = pipeline(Arc::new(PlanningLlm));
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let writer = StreamWriter::new(tx, "t1", tokio_util::sync::CancellationToken::new());

        pipeline
            .stream(
                SearchInput {
                    thread_id: "t1".to_string(),
                    session_id: "s1".to_string(),
                    index_id: "idx".to_string(),
                    document_id: Some("X".to_string()),
                    segment_id: None,
                    query: "summarize doc X".to_string(),
                },
                &writer,
            )
            .await
            .unwrap();

        let mut kinds = Vec::new();
        let mut step_completed_source_ids = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let CoreEvent::StepCompleted { source_id, .. } = &ev {
                step_completed_source_ids.push(*source_id);
            }
            kinds.push(event_kind(&ev));
        }

        assert_eq!(
            kinds,
            vec![
                "phase_update",
                "plan_generated",
                "step_executing",
                "step_completed",
                "step_executing",
                "step_completed",
                "synthesizing_start",
                "text_chunk",
                "citation_data",
                "citation_data",
                "stream_end",
            ]
        );
        assert_eq!(step_completed_source_ids, vec![Some(1), Some(2)]);
    }

    /// **Scenario**: when every step fails, the pipeline emits `error` with code
    /// `no_successful_results` and never reaches the synthesizer.
    #[tokio::test]
    async fn search_pipeline_emits_no_successful_results_when_all_steps_fail() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let health = HealthChecker::new(
            Arc::new({
                struct OnlyFlaky;
                #[async_trait]
                impl ToolLister for OnlyFlaky {
                    async fn list_tools(&self) -> Result<Vec<ToolSpec>, AgentError> {
                        Ok(vec![FailingTool.spec()])
                    }
                }
                OnlyFlaky
            }),
            Duration::from_secs(1),
        );
        struct FlakyPlanLlm;
        #[async_trait]
        impl LlmClient for FlakyPlanLlm {
            async fn invoke(&self, _request: LlmRequest<'_>) -> Result<crate::llm::LlmResponse, AgentError> {
                Ok(crate::llm::LlmResponse {
                    content: r#"{"plan": [{"step": 1, "thought": "x", "tool_name": "flaky", "tool_input": {}}]}"#
                        .to_string(),
                    tool_calls: Vec::new(),
                    usage: None,
                })
            }
        }

        let pipeline = SearchPipeline::new(
            Arc::new(FlakyPlanLlm),
            Arc::new(registry),
            Arc::new(health),
            Arc::new(PromptRegistry::new()),
            CoreConfig::default(),
        );
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let writer = StreamWriter::new(tx, "t2", tokio_util::sync::CancellationToken::new());

        pipeline
            .stream(
                SearchInput {
                    thread_id: "t2".to_string(),
                    session_id: "s1".to_string(),
                    index_id: "idx".to_string(),
                    document_id: None,
                    segment_id: None,
                    query: "q".to_string(),
                },
                &writer,
            )
            .await
            .unwrap();

        let mut kinds = Vec::new();
        let mut error_code = None;
        while let Ok(ev) = rx.try_recv() {
            if let CoreEvent::Error { error_code: code, .. } = &ev {
                error_code = code.clone();
            }
            kinds.push(event_kind(&ev));
        }
        assert_eq!(kinds, vec!["phase_update", "plan_generated", "step_executing", "step_completed", "error"]);
        assert_eq!(error_code.as_deref(), Some("no_successful_results"));
    }
}
