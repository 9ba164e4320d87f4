//! # idp-core
//!
//! Agent orchestration core for an AI-powered intelligent document
//! processing service: a single-turn-tool-call ReAct loop (C6), a
//! Plan-Execute-Respond pipeline for structured search (C7), and a
//! bounded-concurrency deep-research worker pool (C8), fed by a shared
//! Tool Registry (C1), MCP Health Checker (C2), Conversation Store (C3),
//! Checkpoint Store (C4), and Prompt Registry (C5), all multiplexed onto
//! one tagged-union event stream (C9).
//!
//! ## Design principles
//!
//! - **One state type per pipeline**: [`state::ReActState`] for the ReAct
//!   loop, [`state::SearchState`] for Plan-Execute-Respond, [`state::ResearchJob`]
//!   for deep research — each flows end to end through its pipeline with no
//!   separate input/output types beyond the request struct that starts it.
//! - **Exactly one terminal event**: every pipeline run emits exactly one of
//!   `stream_end` / `error` / `interrupt` through [`stream::StreamWriter`],
//!   enforced centrally rather than by each call site remembering to.
//! - **Health-gated tools**: [`health::HealthChecker`] gates which tools
//!   [`tool::ToolRegistry`] offers to the model; a stale or unhealthy tool
//!   server degrades gracefully instead of producing tool-call errors.
//!
//! ## Main modules
//!
//! - [`orchestrator`]: [`orchestrator::AgentCore`] — the single entry point
//!   exposing `Stream`/`Resume`/`Reinit`/`Health`, dispatching to whichever
//!   pipeline a request's [`stream::StreamMode`] names.
//! - [`react`]: [`react::ReActEngine`] — C6 Reason-Act-Observe loop with
//!   human-in-the-loop approval and resumable interrupts.
//! - [`search`]: [`search::Planner`], [`search::Executor`], [`search::Synthesizer`],
//!   composed by [`search::SearchPipeline`] — C7 Plan-Execute-Respond.
//! - [`deep_research`]: [`deep_research::DeepResearchPipeline`], [`deep_research::WorkerPool`],
//!   [`deep_research::EvidenceStore`] — C8 batched segment analysis.
//! - [`tool`]: [`tool::Tool`] trait, [`tool::ToolRegistry`] — C1 tool dispatch
//!   and result normalization.
//! - [`health`]: [`health::HealthChecker`] — C2 liveness state machine.
//! - [`mcp`]: [`mcp::McpHttpClient`] — Streamable HTTP JSON-RPC client for the
//!   MCP aggregator; the concrete [`tool::Tool`]/[`health::ToolLister`] backing
//!   used outside tests.
//! - [`conversation`]: [`conversation::ConversationStore`] — C3 bounded
//!   per-thread message history.
//! - [`checkpoint`]: [`checkpoint::Checkpointer`], [`checkpoint::MemorySaver`],
//!   [`checkpoint::SqliteSaver`] — C4 resumable state snapshots.
//! - [`prompts`]: [`prompts::PromptRegistry`] — C5 named, variable-substituted
//!   templates.
//! - [`stream`]: [`stream::StreamWriter`], [`stream::EventMultiplexer`],
//!   [`stream::StreamMode`] — C9 event delivery.
//! - [`llm`]: [`llm::LlmClient`] trait, [`llm::MockLlm`], [`llm::ChatOpenAI`].
//! - [`state`]: shared state and wire-adjacent types for all three pipelines.
//! - [`message`]: [`message::Message`] (System / User / Assistant / Tool).
//! - [`agent_context`]: [`agent_context::AgentContext`] — per-request scope
//!   threaded through tool calls and prompt rendering.
//! - [`config`]: [`config::CoreConfig`] — process-wide tunables, `AGENT_*` env.
//! - [`error`]: [`error::AgentError`] taxonomy with retryable/terminal classification.
//!
//! Key types are re-exported at crate root:
//! `use idp_core::{AgentCore, AgentError, Message};`

pub mod agent_context;
pub mod checkpoint;
pub mod config;
pub mod conversation;
pub mod deep_research;
pub mod error;
pub mod health;
pub mod llm;
pub mod mcp;
pub mod message;
pub mod orchestrator;
pub mod prompts;
pub mod react;
pub mod search;
pub mod state;
pub mod stream;
pub mod tool;

pub use agent_context::{AgentContext, AnalysisHistoryEntry};
pub use checkpoint::{CheckpointError, Checkpointer, MemorySaver, SqliteSaver};
pub use config::CoreConfig;
pub use conversation::{ConversationStats, ConversationStore};
pub use deep_research::{DeepResearchPipeline, EvidenceStore, ResearchInput, SegmentType, WorkerPool};
pub use error::AgentError;
pub use health::{Health, HealthChecker, ToolLister};
pub use llm::{ChatOpenAI, LlmClient, LlmRequest, LlmResponse, LlmUsage, MockLlm, ToolChoiceMode};
pub use mcp::{register_mcp_tools, McpHttpClient, McpTool};
pub use message::{ContentBlock, Message, MessageContent, ToolCallRequest};
pub use orchestrator::{AgentCore, HealthStatus, ReinitRequest, StreamRequest};
pub use prompts::{LoadError as PromptLoadError, PromptRegistry, PromptTemplate, RenderedPrompt};
pub use react::{ReActEngine, ReActInput};
pub use search::{Executor, Planner, SearchInput, SearchPipeline, Synthesizer};
pub use state::{
    Attachment, Evidence, EvidenceFinding, EvidenceSection, ExecutionPlan, ExecutionResult,
    JobProgress, JobStatus, PlanStep, PlanStepStatus, ReActState, Reference, ReferenceType,
    ResearchCost, ResearchJob, ResearchMemory, ResearchOutcome, ResearchProgress, ResearchStats,
    SearchPhase, SearchState, SegmentResult, ToolCall, ToolResult, ToolSpec,
};
pub use stream::{EventMultiplexer, MessageChunk, StreamMode, StreamWriter};
pub use tool::{Tool, ToolRegistry};

pub use stream_event::{to_json, CoreEvent, Envelope, EnvelopeState, PlanStepWire, ReferenceWire};

/// When running `cargo test -p idp-core`, initializes tracing from `RUST_LOG` so that
/// unit tests under `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
