//! ReAct Engine (C6): reason/act/observe loop over messages, with
//! summarization, interrupt/resume, and streamed events (spec §4.6).
//!
//! Grounded in `loom/src/agent/react/think_node.rs`'s streaming idiom
//! (`Arc<dyn LlmClient>`, retry-then-invoke, assistant-message assembly) and
//! `original_source/.../agent/react_agent/{conversation_manager,tool_node,
//! graph_builder}.py` for the summarization trigger and tool-dispatch/route
//! logic. The teacher drives its Think/Act/Observe nodes through a generic
//! `StateGraph`; this engine has exactly one fixed loop shape, so it's
//! written directly as a method over `ReActState` rather than standing up a
//! second generic graph engine next to the teacher's (see DESIGN.md).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::agent_context::AgentContext;
use crate::checkpoint::Checkpointer;
use crate::config::CoreConfig;
use crate::conversation::ConversationStore;
use crate::error::AgentError;
use crate::health::HealthChecker;
use crate::llm::{LlmClient, LlmRequest, LlmResponse, ToolChoiceMode};
use crate::message::{ContentBlock, Message, MessageContent};
use crate::prompts::PromptRegistry;
use crate::state::{Attachment, ReActState, Reference, ReferenceType};
use crate::stream::StreamWriter;
use crate::tool::ToolRegistry;

use stream_event::{CoreEvent, ReferenceWire};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const SUMMARY_KEEP_LAST: usize = 4;
const SUMMARIZE_EVERY: usize = 6;

/// Input to one `Stream` call against the ReAct engine (spec §6
/// `Stream(query, mode=react, ...)`, narrowed to this engine's fields).
pub struct ReActInput {
    pub thread_id: String,
    pub session_id: String,
    pub index_id: Option<String>,
    pub document_id: Option<String>,
    pub segment_id: Option<String>,
    pub query: String,
    pub files: Vec<Attachment>,
    /// When true, the engine pauses before dispatching tool calls and emits
    /// `interrupt` instead, per spec §4.6 step 6.
    pub require_approval: bool,
}

/// Reason/act/observe loop (C6): `initial -> call_model -> {tools ->
/// call_model}* -> (summarize -> call_model)? -> terminal`.
pub struct ReActEngine {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    health: Arc<HealthChecker>,
    conversations: Arc<ConversationStore>,
    checkpoints: Arc<dyn Checkpointer<ReActState>>,
    prompts: Arc<PromptRegistry>,
    config: CoreConfig,
}

impl ReActEngine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        health: Arc<HealthChecker>,
        conversations: Arc<ConversationStore>,
        checkpoints: Arc<dyn Checkpointer<ReActState>>,
        prompts: Arc<PromptRegistry>,
        config: CoreConfig,
    ) -> Self {
        ReActEngine {
            llm,
            tools,
            health,
            conversations,
            checkpoints,
            prompts,
            config,
        }
    }

    /// Starts (or continues) a ReAct session for `input.thread_id`, streaming
    /// events through `writer` until exactly one terminal event is emitted (P6).
    pub async fn stream(&self, input: ReActInput, writer: &StreamWriter) -> Result<(), AgentError> {
        let attachments = validate_attachments(&input.files)?;

        let mut ctx = AgentContext::new(
            input.index_id.clone().unwrap_or_default(),
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

        let mut vars = HashMap::new();
        vars.insert("DATETIME".to_string(), chrono::Utc::now().to_rfc3339());
        vars.insert("INDEX_ID".to_string(), ctx.index_id.clone());
        vars.insert(
            "DOCUMENT_ID".to_string(),
            input.document_id.clone().unwrap_or_default(),
        );
        vars.insert(
            "SEGMENT_ID".to_string(),
            input.segment_id.clone().unwrap_or_default(),
        );
        vars.insert("QUERY".to_string(), input.query.clone());
        let rendered = self.prompts.render("agent_profile", &vars)?;

        let mut state = self
            .checkpoints
            .get_state(&input.thread_id)
            .await?
            .unwrap_or_else(ReActState::new);
        state.tool_references.clear();
        state.index_id = Some(ctx.index_id.clone());
        state.session_id = Some(ctx.session_id.clone());

        let mut instruction_blocks = vec![ContentBlock::Text {
            text: rendered.instruction.clone(),
        }];
        for attachment in &attachments {
            instruction_blocks.push(ContentBlock::ImageRef {
                media_type: attachment.media_type.clone(),
                data: attachment.data.clone(),
            });
        }
        let instruction = if attachments.is_empty() {
            Message::user(rendered.instruction)
        } else {
            Message::User {
                content: MessageContent::Blocks(instruction_blocks),
            }
        };

        state.messages = self
            .conversations
            .prepare(&input.thread_id, Message::system(rendered.system_prompt), instruction);
        state.turn_count += 1;

        let outcome = self.run_loop(&mut state, &ctx, input.require_approval, writer).await;
        self.finish_request(outcome, &mut state, &ctx, writer).await
    }

    /// Continues an interrupted session (spec §4.6 step 6). On `approved =
    /// false`, injects a tool-rejection message per pending call and resumes
    /// at `call_model`; on `true`, dispatches the pending calls first.
    pub async fn resume(&self, thread_id: &str, approved: bool, writer: &StreamWriter) -> Result<(), AgentError> {
        let mut state = self
            .checkpoints
            .get_state(thread_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("no pending interrupt for thread '{thread_id}'")))?;

        let ctx = AgentContext::new(
            state.index_id.clone().unwrap_or_default(),
            thread_id,
            state.session_id.clone().unwrap_or_default(),
            "",
        );

        let outcome = if approved {
            match self.dispatch_tools(&mut state, &ctx, writer).await {
                Ok(()) => self.run_loop(&mut state, &ctx, false, writer).await,
                Err(err) => Err(err),
            }
        } else {
            for call in std::mem::take(&mut state.tool_calls) {
                state
                    .messages
                    .push(Message::tool(call.id.clone(), "Tool call rejected by the user."));
            }
            self.run_loop(&mut state, &ctx, false, writer).await
        };
        self.finish_request(outcome, &mut state, &ctx, writer).await
    }

    async fn run_loop(
        &self,
        state: &mut ReActState,
        ctx: &AgentContext,
        require_approval: bool,
        writer: &StreamWriter,
    ) -> Result<LoopOutcome, AgentError> {
        let mut total_tokens: u64 = 0;
        loop {
            if should_summarize(state, self.config.summarization_threshold) {
                self.summarize(state).await?;
            }

            let toolset = self.available_toolset().await;
            let response = self
                .call_model_with_retry(&messages_for_model(state), &toolset)
                .await?;

            if let Some(usage) = &response.usage {
                total_tokens += usage.total_tokens as u64;
                if let Some(budget) = self.config.budget_tokens {
                    if total_tokens > budget {
                        return Err(AgentError::BudgetExceeded(format!(
                            "consumed {total_tokens} tokens against a budget of {budget}"
                        )));
                    }
                }
            }

            if response.tool_calls.is_empty() {
                if !response.content.is_empty() {
                    writer
                        .emit(CoreEvent::TextChunk {
                            text_id: uuid::Uuid::new_v4().to_string(),
                            text: response.content.clone(),
                        })
                        .await;
                }
                state.messages.push(Message::assistant(response.content));
                return Ok(LoopOutcome::Done);
            }

            state.messages.push(assistant_message_with_tool_calls(&response));
            state.tool_calls = response.tool_calls;

            if require_approval {
                self.checkpoints.update_state(&ctx.thread_id, state.clone()).await?;
                writer
                    .emit(CoreEvent::Interrupt {
                        requires_approval: true,
                        thread_id: ctx.thread_id.clone(),
                    })
                    .await;
                return Ok(LoopOutcome::Interrupted);
            }

            self.dispatch_tools(state, ctx, writer).await?;
        }
    }

    /// Dispatches every pending tool call in model-given order (spec §5
    /// ordering guarantee ii), appending a tool-role message per result and
    /// aggregating references onto `state.tool_references`.
    async fn dispatch_tools(
        &self,
        state: &mut ReActState,
        ctx: &AgentContext,
        writer: &StreamWriter,
    ) -> Result<(), AgentError> {
        for call in std::mem::take(&mut state.tool_calls) {
            writer
                .emit(CoreEvent::ToolUse {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;

            let result = self.tools.invoke(&call.name, call.arguments.clone(), ctx).await?;

            let summary = if result.success {
                result.message.clone()
            } else {
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("tool '{}' failed", call.name))
            };
            writer
                .emit(CoreEvent::ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    success: result.success,
                    summary: summary.clone(),
                })
                .await;

            state
                .messages
                .push(tool_message(&call.id, &result.message, result.attachments.first()));
            state.tool_references.extend(result.references.clone());
        }
        Ok(())
    }

    async fn summarize(&self, state: &mut ReActState) -> Result<(), AgentError> {
        if state.messages.len() <= SUMMARY_KEEP_LAST {
            return Ok(());
        }
        let split = state.messages.len() - SUMMARY_KEEP_LAST;
        let older = &state.messages[..split];

        let transcript = older
            .iter()
            .map(|m| format!("{}: {}", role_label(m), m.content().as_text()))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Please summarize the following conversation briefly. It should include \
             key questions, answers, and conclusions.\n\n{transcript}\n\nSummary:"
        );

        let response = self
            .call_model_with_retry(&[Message::user(prompt)], &[])
            .await?;

        state.summary = Some(match &state.summary {
            Some(prior) => format!("{prior}\n\n[Recent conversation summary]\n{}", response.content),
            None => response.content,
        });
        state.messages = state.messages[split..].to_vec();
        state.last_summarization_at = Some(state.messages.len().to_string());
        state.needs_summarization = false;
        Ok(())
    }

    async fn available_toolset(&self) -> Vec<crate::state::ToolSpec> {
        if self
            .health
            .is_healthy_within(self.config.mcp_health_check_timeout)
            .await
        {
            self.tools.list()
        } else {
            Vec::new()
        }
    }

    async fn call_model_with_retry(
        &self,
        messages: &[Message],
        tools: &[crate::state::ToolSpec],
    ) -> Result<LlmResponse, AgentError> {
        let mut attempt = 0u32;
        let mut delay = BACKOFF_BASE;
        let mut timed_out_once = false;
        loop {
            let request = LlmRequest {
                messages,
                tools,
                max_tokens: self.config.max_tokens,
                temperature: 0.2,
                tool_choice: ToolChoiceMode::Auto,
            };
            match tokio::time::timeout(self.config.model_timeout, self.llm.invoke(request)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(err)) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(BACKOFF_CAP);
                }
                Ok(Err(err)) => return Err(err),
                Err(_elapsed) if !timed_out_once => {
                    timed_out_once = true;
                }
                Err(_elapsed) => return Err(AgentError::ModelTimeout(self.config.model_timeout)),
            }
        }
    }

    /// Emits the single terminal event for this request (P6) and clears
    /// `tool_references` in the persisted checkpoint (spec §4.4).
    async fn finish_request(
        &self,
        outcome: Result<LoopOutcome, AgentError>,
        state: &mut ReActState,
        ctx: &AgentContext,
        writer: &StreamWriter,
    ) -> Result<(), AgentError> {
        match outcome {
            Ok(LoopOutcome::Interrupted) => Ok(()),
            Ok(LoopOutcome::Done) => {
                let refs = dedup_references(&state.tool_references);
                if !refs.is_empty() {
                    writer
                        .emit(CoreEvent::References {
                            references: refs.iter().map(to_wire_reference).collect(),
                        })
                        .await;
                }
                state.tool_references.clear();
                self.checkpoints.update_state(&ctx.thread_id, state.clone()).await?;
                self.conversations
                    .append_user(&ctx.thread_id, Message::user(ctx.user_query.clone()));
                if let Some(last) = state.messages.iter().rev().find(|m| matches!(m, Message::Assistant { .. })) {
                    self.conversations.append_assistant(&ctx.thread_id, last.clone());
                }
                writer.emit(CoreEvent::StreamEnd).await;
                Ok(())
            }
            Err(err) => {
                writer
                    .emit(CoreEvent::Error {
                        error_message: err.to_string(),
                        error_code: error_code(&err),
                    })
                    .await;
                Ok(())
            }
        }
    }
}

/// Whether a completed `run_loop` finished with content or paused for
/// approval; `finish_request` only emits `stream_end`/`references` in the
/// former case, since `interrupt` was already sent as the terminal event.
enum LoopOutcome {
    Done,
    Interrupted,
}

fn should_summarize(state: &ReActState, threshold: usize) -> bool {
    if state.messages.len() < threshold {
        return false;
    }
    let since_last = state
        .last_summarization_at
        .as_deref()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(0);
    state.messages.len().saturating_sub(since_last) >= SUMMARIZE_EVERY
}

/// Folds any accumulated summary into a synthetic system-prompt augmentation
/// for this call only; `state.messages` itself stays untouched.
fn messages_for_model(state: &ReActState) -> Vec<Message> {
    let Some(summary) = &state.summary else {
        return state.messages.clone();
    };
    let mut out = state.messages.clone();
    if let Some(first) = out.first_mut() {
        if first.is_system() {
            let augmented = format!("{}\n\nConversation summary so far:\n{summary}", first.content().as_text());
            *first = Message::system(augmented);
        }
    }
    out
}

fn role_label(message: &Message) -> &'static str {
    match message {
        Message::System { .. } => "System",
        Message::User { .. } => "User",
        Message::Assistant { .. } => "Assistant",
        Message::Tool { .. } => "Tool",
    }
}

fn assistant_message_with_tool_calls(response: &LlmResponse) -> Message {
    let tool_calls = response
        .tool_calls
        .iter()
        .map(|call| crate::message::ToolCallRequest {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        })
        .collect();
    Message::assistant_with_tool_calls(response.content.clone(), tool_calls)
}

fn tool_message(call_id: &str, text: &str, attachment: Option<&Attachment>) -> Message {
    match attachment {
        None => Message::tool(call_id, text),
        Some(attachment) => Message::Tool {
            content: MessageContent::Blocks(vec![
                ContentBlock::ToolResult {
                    tool_use_id: call_id.to_string(),
                    content: text.to_string(),
                },
                ContentBlock::ImageRef {
                    media_type: attachment.media_type.clone(),
                    data: attachment.data.clone(),
                },
            ]),
            tool_call_id: call_id.to_string(),
        },
    }
}

fn dedup_references(refs: &[Reference]) -> Vec<Reference> {
    let mut seen = HashSet::new();
    refs.iter()
        .filter(|r| seen.insert(r.id.clone()))
        .cloned()
        .collect()
}

fn to_wire_reference(r: &Reference) -> ReferenceWire {
    ReferenceWire {
        id: r.id.clone(),
        kind: match r.kind {
            ReferenceType::Document => "document",
            ReferenceType::Image => "image",
            ReferenceType::Url => "url",
            ReferenceType::ShowDocumentPanel => "show_document_panel",
        }
        .to_string(),
        title: r.title.clone(),
        display_name: r.display_name.clone(),
        value: r.value.clone(),
        metadata: serde_json::to_value(&r.metadata).unwrap_or(serde_json::Value::Null),
    }
}

fn error_code(err: &AgentError) -> Option<String> {
    let code = match err {
        AgentError::BudgetExceeded(_) => "budget_exceeded",
        AgentError::SchemaError { .. } => "schema_error",
        AgentError::ValidationError(_) => "validation_error",
        AgentError::NotFound(_) => "not_found",
        AgentError::ToolUnavailable(_) => "tool_unavailable",
        AgentError::RateLimit(_) => "rate_limit",
        AgentError::ModelTimeout(_) => "model_timeout",
        AgentError::AttachmentError(_) => "attachment_error",
        _ => return None,
    };
    Some(code.to_string())
}

/// Validates inbound files before they're folded into the first turn's
/// instruction (spec §4.6 step 1). Actual pixel decode/re-encode is out of
/// scope (spec §1 Non-goals: "image/video decoding"); this validates the
/// declared media type and enforces the size cap the normalizer otherwise
/// applies only to tool-produced attachments.
fn validate_attachments(files: &[Attachment]) -> Result<Vec<Attachment>, AgentError> {
    const MAX_BYTES: usize = 4 * 1024 * 1024;
    files
        .iter()
        .map(|file| {
            if file.kind != "image" || !matches!(file.media_type.as_str(), "image/png" | "image/jpeg") {
                return Err(AgentError::AttachmentError(format!(
                    "unsupported attachment type '{}'",
                    file.media_type
                )));
            }
            if file.byte_len() > MAX_BYTES {
                return Err(AgentError::AttachmentError(
                    "attachment exceeds 4MB limit".to_string(),
                ));
            }
            Ok(file.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemorySaver;
    use crate::health::ToolLister;
    use crate::llm::MockLlm;
    use crate::state::ToolCall;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn spec(&self) -> crate::state::ToolSpec {
            crate::state::ToolSpec {
                name: "echo".to_string(),
                description: "echoes".to_string(),
                input_schema: json!({}),
                supports_agent_context: false,
            }
        }
        async fn call(&self, args: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
            Ok(json!({"content": format!("Echo: {}", args["message"].as_str().unwrap_or(""))}))
        }
    }

    struct AlwaysHealthy;

    #[async_trait]
    impl ToolLister for AlwaysHealthy {
        async fn list_tools(&self) -> Result<Vec<crate::state::ToolSpec>, AgentError> {
            Ok(vec![EchoTool.spec()])
        }
    }

    struct NeverHealthy;

    #[async_trait]
    impl ToolLister for NeverHealthy {
        async fn list_tools(&self) -> Result<Vec<crate::state::ToolSpec>, AgentError> {
            Ok(Vec::new())
        }
    }

    use serde_json::Value;

    /// Model that returns tool_calls on its first invocation, then plain content.
    struct ScriptedLlm {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn invoke(&self, _request: LlmRequest<'_>) -> Result<LlmResponse, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(LlmResponse {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "call-1".into(),
                        name: "echo".into(),
                        arguments: json!({"message": "Hi"}),
                    }],
                    usage: None,
                })
            } else {
                Ok(LlmResponse {
                    content: "Said: Hi".to_string(),
                    tool_calls: Vec::new(),
                    usage: None,
                })
            }
        }
    }

    fn engine(llm: Arc<dyn LlmClient>, healthy: bool) -> ReActEngine {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let health = if healthy {
            HealthChecker::new(Arc::new(AlwaysHealthy), Duration::from_secs(1))
        } else {
            HealthChecker::new(Arc::new(NeverHealthy), Duration::from_secs(1))
        };
        ReActEngine::new(
            llm,
            Arc::new(registry),
            Arc::new(health),
            Arc::new(ConversationStore::new(10, 50, Duration::from_secs(3600))),
            Arc::new(MemorySaver::<ReActState>::new()),
            Arc::new(PromptRegistry::new()),
            CoreConfig::default(),
        )
    }

    /// **Scenario S1**: one tool turn emits tool_use, tool_result, text_chunk, stream_end,
    /// with no references event (the tool returned none).
    #[tokio::test]
    async fn react_one_tool_turn_matches_s1_sequence() {
        let llm = Arc::new(ScriptedLlm {
            calls: AtomicUsize::new(0),
        });
        let engine = engine(llm, true);
        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        let writer = StreamWriter::new(tx, "t1", tokio_util::sync::CancellationToken::new());

        engine
            .stream(
                ReActInput {
                    thread_id: "t1".to_string(),
                    session_id: "s1".to_string(),
                    index_id: Some("idx".to_string()),
                    document_id: None,
                    segment_id: None,
                    query: "Hello".to_string(),
                    files: Vec::new(),
                    require_approval: false,
                },
                &writer,
            )
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(event_kind(&ev));
        }
        assert_eq!(kinds, vec!["tool_use", "tool_result", "text_chunk", "stream_end"]);
    }

    /// **Scenario S4**: an unhealthy tool aggregator means no tools are offered; the
    /// engine proceeds straight to content with no tool_use events.
    #[tokio::test]
    async fn react_unhealthy_aggregator_skips_tools() {
        let llm = Arc::new(MockLlm::with_no_tool_calls("no tools available, answering directly"));
        let engine = engine(llm, false);
        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        let writer = StreamWriter::new(tx, "t2", tokio_util::sync::CancellationToken::new());

        engine
            .stream(
                ReActInput {
                    thread_id: "t2".to_string(),
                    session_id: "s1".to_string(),
                    index_id: Some("idx".to_string()),
                    document_id: None,
                    segment_id: None,
                    query: "Hello".to_string(),
                    files: Vec::new(),
                    require_approval: false,
                },
                &writer,
            )
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(event_kind(&ev));
        }
        assert_eq!(kinds, vec!["text_chunk", "stream_end"]);
    }

    /// **Scenario S5**: an approval-required turn emits tool_use then interrupt; Resume
    /// continues with tool_result, text_chunk, stream_end.
    #[tokio::test]
    async fn react_interrupt_then_resume_matches_s5_sequence() {
        let llm = Arc::new(ScriptedLlm {
            calls: AtomicUsize::new(0),
        });
        let engine = engine(llm, true);
        let mut mux = crate::stream::EventMultiplexer::new(32);
        let mut rx = mux.take_receiver().unwrap();
        let writer = mux.writer_for("t3");

        engine
            .stream(
                ReActInput {
                    thread_id: "t3".to_string(),
                    session_id: "s1".to_string(),
                    index_id: Some("idx".to_string()),
                    document_id: None,
                    segment_id: None,
                    query: "Hello".to_string(),
                    files: Vec::new(),
                    require_approval: true,
                },
                &writer,
            )
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(event_kind(&ev));
        }
        assert_eq!(kinds, vec!["tool_use", "interrupt"]);

        let writer2 = mux.writer_for("t3");
        engine.resume("t3", true, &writer2).await.unwrap();
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(event_kind(&ev));
        }
        assert_eq!(kinds, vec!["tool_result", "text_chunk", "stream_end"]);
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

    /// **Scenario**: should_summarize triggers only once both the length and
    /// since-last-summary thresholds are crossed.
    #[test]
    fn should_summarize_requires_both_thresholds() {
        let mut state = ReActState::new();
        for i in 0..11 {
            state.messages.push(Message::user(format!("m{i}")));
        }
        assert!(!should_summarize(&state, 12));
        state.messages.push(Message::user("m11"));
        assert!(should_summarize(&state, 12));
        state.last_summarization_at = Some((state.messages.len() - 2).to_string());
        assert!(!should_summarize(&state, 12));
    }
}
