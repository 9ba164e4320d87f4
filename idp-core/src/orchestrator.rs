//! Top-level orchestration surface (spec §6 External Interfaces).
//!
//! `AgentCore` is the single object the HTTP layer holds: `Stream`/`Resume`
//! dispatch into C6/C7/C8 behind a fresh [`EventMultiplexer`] per request,
//! `Reinit` swaps the model and clears conversation scope, `Health`
//! aggregates C2 with a model reachability probe. Grounded in the teacher's
//! `cli_run::run_agent` (one dispatch point building a runner per invocation
//! from shared `Arc` state) generalized from one graph to this spec's three
//! fixed pipelines.

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{info_span, Instrument};

use crate::checkpoint::Checkpointer;
use crate::config::CoreConfig;
use crate::conversation::ConversationStore;
use crate::deep_research::{DeepResearchPipeline, EvidenceStore, ResearchInput};
use crate::error::AgentError;
use crate::health::HealthChecker;
use crate::llm::{LlmClient, LlmRequest, ToolChoiceMode};
use crate::prompts::PromptRegistry;
use crate::react::{ReActEngine, ReActInput};
use crate::search::{SearchInput, SearchPipeline};
use crate::state::{Attachment, ReActState};
use crate::stream::{EventMultiplexer, StreamMode};
use crate::tool::ToolRegistry;

use stream_event::CoreEvent;

/// One `Stream` call's parameters (spec §6: `Stream(query, mode, index_id?,
/// document_id?, segment_id?, thread_id?, model_id?, files?)`).
pub struct StreamRequest {
    pub query: String,
    pub mode: StreamMode,
    pub index_id: Option<String>,
    pub document_id: Option<String>,
    pub segment_id: Option<String>,
    pub thread_id: Option<String>,
    pub model_id: Option<String>,
    pub files: Vec<Attachment>,
    pub require_approval: bool,
}

impl StreamRequest {
    pub fn new(query: impl Into<String>, mode: StreamMode) -> Self {
        StreamRequest {
            query: query.into(),
            mode,
            index_id: None,
            document_id: None,
            segment_id: None,
            thread_id: None,
            model_id: None,
            files: Vec::new(),
            require_approval: false,
        }
    }
}

/// One `Reinit` call's parameters (spec §6: "resets pipelines; clears
/// conversation history for the targeted scope").
#[derive(Default)]
pub struct ReinitRequest {
    pub model_id: Option<String>,
    pub reload_prompts: bool,
    pub thread_id: Option<String>,
    /// Accepted for interface parity with spec §6; this core has no
    /// index-scoped state to invalidate (Conversation Store keys by
    /// `thread_id`, Tool Registry's cache invalidates itself on the next
    /// dispatch whose `AgentContext` carries a different `index_id`).
    pub index_id: Option<String>,
}

/// Aggregated liveness (spec §6 `Health() Status`: "aggregates C2 and model
/// reachability").
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub tools_healthy: bool,
    pub tools_count: usize,
    pub model_reachable: bool,
    pub model_id: String,
}

/// Everything one process needs to serve `Stream`/`Resume`/`Reinit`/`Health`
/// (spec §6). Each `stream`/`resume` call builds a fresh pipeline from shared
/// `Arc` state rather than keeping one long-lived engine, so a model swap via
/// `Reinit` takes effect on the very next call without restarting anything.
pub struct AgentCore {
    llm: RwLock<Arc<dyn LlmClient>>,
    llm_factory: Box<dyn Fn(&str) -> Arc<dyn LlmClient> + Send + Sync>,
    model_id: RwLock<String>,
    tools: Arc<ToolRegistry>,
    health: Arc<HealthChecker>,
    conversations: Arc<ConversationStore>,
    checkpoints: Arc<dyn Checkpointer<ReActState>>,
    prompts: Arc<PromptRegistry>,
    evidence: Arc<EvidenceStore>,
    config: RwLock<CoreConfig>,
}

impl AgentCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm_factory: Box<dyn Fn(&str) -> Arc<dyn LlmClient> + Send + Sync>,
        tools: Arc<ToolRegistry>,
        health: Arc<HealthChecker>,
        conversations: Arc<ConversationStore>,
        checkpoints: Arc<dyn Checkpointer<ReActState>>,
        prompts: Arc<PromptRegistry>,
        evidence: Arc<EvidenceStore>,
        config: CoreConfig,
    ) -> Self {
        let initial_llm = llm_factory(&config.model_id);
        tools.set_retry_attempts(config.mcp_retry_attempts);
        AgentCore {
            llm: RwLock::new(initial_llm),
            llm_factory,
            model_id: RwLock::new(config.model_id.clone()),
            tools,
            health,
            conversations,
            checkpoints,
            prompts,
            evidence,
            config: RwLock::new(config),
        }
    }

    fn current_llm(&self) -> Arc<dyn LlmClient> {
        self.llm.read().expect("llm lock poisoned").clone()
    }

    fn current_config(&self) -> CoreConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Starts a new pipeline run, returning the receiving end of its event
    /// stream immediately; the pipeline itself runs on a spawned task (spec
    /// §6 `Stream(...) <-chan CoreEvent`).
    pub fn stream(&self, req: StreamRequest) -> mpsc::Receiver<CoreEvent> {
        let thread_id = req.thread_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session_id = thread_id.clone();
        let mode = match req.mode {
            StreamMode::React => "react",
            StreamMode::PlanExecute => "plan_execute",
            StreamMode::DeepResearch => "deep_research",
        };
        let span = info_span!("stream", mode, thread_id = %thread_id);
        tracing::info!(parent: &span, "stream started");

        let mut mux = EventMultiplexer::new(1024);
        let writer = mux.writer_for(thread_id.clone());
        let rx = mux.take_receiver().expect("freshly constructed multiplexer");

        let llm = req
            .model_id
            .as_deref()
            .map(|m| (self.llm_factory)(m))
            .unwrap_or_else(|| self.current_llm());
        let tools = self.tools.clone();
        let health = self.health.clone();
        let conversations = self.conversations.clone();
        let checkpoints = self.checkpoints.clone();
        let prompts = self.prompts.clone();
        let evidence = self.evidence.clone();
        let config = self.current_config();

        tokio::spawn(
            async move {
                match req.mode {
                    StreamMode::React => {
                        let engine = ReActEngine::new(llm, tools, health, conversations, checkpoints, prompts, config);
                        let input = ReActInput {
                            thread_id,
                            session_id,
                            index_id: req.index_id,
                            document_id: req.document_id,
                            segment_id: req.segment_id,
                            query: req.query,
                            files: req.files,
                            require_approval: req.require_approval,
                        };
                        let _ = engine.stream(input, &writer).await;
                    }
                    StreamMode::PlanExecute => {
                        let pipeline = SearchPipeline::new(llm, tools, health, prompts, config);
                        let input = SearchInput {
                            thread_id,
                            session_id,
                            index_id: req.index_id.unwrap_or_default(),
                            document_id: req.document_id,
                            segment_id: req.segment_id,
                            query: req.query,
                        };
                        let _ = pipeline.stream(input, &writer).await;
                    }
                    StreamMode::DeepResearch => {
                        let pipeline = DeepResearchPipeline::new(tools, evidence, config);
                        let input = ResearchInput {
                            thread_id,
                            session_id,
                            index_id: req.index_id.unwrap_or_default(),
                            document_id: req.document_id.unwrap_or_default(),
                            query: req.query,
                            job_id: None,
                        };
                        let _ = pipeline.run(input, &writer).await;
                    }
                }
            }
            .instrument(span),
        );

        rx
    }

    /// Continues an interrupted ReAct session (spec §6 `Resume(thread_id,
    /// approved) <-chan CoreEvent`).
    pub fn resume(&self, thread_id: String, approved: bool) -> mpsc::Receiver<CoreEvent> {
        let span = info_span!("resume", thread_id = %thread_id, approved);
        tracing::info!(parent: &span, "resume started");

        let mut mux = EventMultiplexer::new(1024);
        let writer = mux.writer_for(thread_id.clone());
        let rx = mux.take_receiver().expect("freshly constructed multiplexer");

        let llm = self.current_llm();
        let tools = self.tools.clone();
        let health = self.health.clone();
        let conversations = self.conversations.clone();
        let checkpoints = self.checkpoints.clone();
        let prompts = self.prompts.clone();
        let config = self.current_config();

        tokio::spawn(
            async move {
                let engine = ReActEngine::new(llm, tools, health, conversations, checkpoints, prompts, config);
                let _ = engine.resume(&thread_id, approved, &writer).await;
            }
            .instrument(span),
        );

        rx
    }

    /// Swaps the active model, optionally reloads prompt templates, and
    /// clears conversation history for `thread_id` (or every thread when
    /// unset) (spec §6).
    pub fn reinit(&self, req: ReinitRequest) -> Result<(), AgentError> {
        let span = info_span!("reinit", thread_id = req.thread_id.as_deref().unwrap_or(""));
        let _enter = span.enter();
        tracing::info!("reinit started");

        if let Some(model_id) = req.model_id {
            let new_llm = (self.llm_factory)(&model_id);
            *self.llm.write().expect("llm lock poisoned") = new_llm;
            *self.model_id.write().expect("model_id lock poisoned") = model_id.clone();
            self.config.write().expect("config lock poisoned").model_id = model_id;
        }
        if req.reload_prompts {
            self.prompts.reload().map_err(AgentError::internal)?;
        }
        self.conversations.clear(req.thread_id.as_deref());
        Ok(())
    }

    /// Aggregates Tool Registry health (C2) and a live model round-trip
    /// (spec §6 `Health() Status`).
    pub async fn health(&self) -> HealthStatus {
        let span = info_span!("health");
        async move {
            let snapshot = self.health.snapshot();
            let model_id = self.model_id.read().expect("model_id lock poisoned").clone();
            let llm = self.current_llm();
            let model_timeout = self.current_config().model_timeout;

            let probe = llm.invoke(LlmRequest {
                messages: &[],
                tools: &[],
                max_tokens: 1,
                temperature: 0.0,
                tool_choice: ToolChoiceMode::None,
            });
            let model_reachable = tokio::time::timeout(model_timeout, probe)
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);

            HealthStatus {
                healthy: snapshot.healthy && model_reachable,
                tools_healthy: snapshot.healthy,
                tools_count: snapshot.tools_count,
                model_reachable,
                model_id,
            }
        }
        .instrument(span)
        .await
    }
}
