//! Process-wide configuration (spec §6 Configuration, SPEC_FULL §3 supplement).
//!
//! Field names and defaults are grounded in the original `AgentConfig`
//! (`env_prefix="AGENT_"`). `CoreConfig::from_env` first calls the `config`
//! crate's `load_and_apply` to populate `std::env` from `.env`/XDG TOML for any
//! `AGENT_*` key not already set, so process env always wins, then reads the
//! resulting environment.

use std::time::Duration;

/// Typed, validated settings for the agent orchestration core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub model_id: String,
    pub max_tokens: u32,
    pub model_timeout: Duration,
    pub max_retries: u32,
    pub summarization_threshold: usize,
    pub max_conversation_messages: usize,
    pub max_threads: usize,
    pub max_messages_per_thread: usize,
    pub mcp_health_check_timeout: Duration,
    pub mcp_connection_timeout: Duration,
    pub mcp_retry_attempts: u32,
    pub conversation_ttl: Duration,
    pub ref_image_max_attach: usize,
    pub ref_image_max_base64_len: usize,
    pub max_content_len: usize,
    pub rerank_score_threshold: f64,
    pub rerank_top_n: usize,
    pub hybrid_search_size: usize,
    pub deep_research_batch_size: usize,
    pub deep_research_num_workers: usize,
    pub deep_research_max_concurrent: usize,
    pub tool_call_timeout: Duration,
    /// Hard ceiling on cumulative model tokens for one ReAct request (spec
    /// §4.6 "Budget"). `None` means unbounded.
    pub budget_tokens: Option<u64>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            model_id: "gpt-4o".to_string(),
            max_tokens: 4096,
            model_timeout: Duration::from_secs(60),
            max_retries: 3,
            summarization_threshold: 12,
            max_conversation_messages: 10,
            max_threads: 100,
            max_messages_per_thread: 50,
            mcp_health_check_timeout: Duration::from_secs(10),
            mcp_connection_timeout: Duration::from_secs(30),
            mcp_retry_attempts: 3,
            conversation_ttl: Duration::from_secs(3600),
            ref_image_max_attach: 1,
            ref_image_max_base64_len: 500_000,
            max_content_len: 32_000,
            rerank_score_threshold: 0.05,
            rerank_top_n: 5,
            hybrid_search_size: 15,
            deep_research_batch_size: 50,
            deep_research_num_workers: 3,
            deep_research_max_concurrent: 1,
            tool_call_timeout: Duration::from_secs(30),
            budget_tokens: None,
        }
    }
}

impl CoreConfig {
    /// Builds config from defaults, overriding any field whose `AGENT_*` env var is set.
    /// Malformed numeric/duration values are ignored (default retained) rather than failing
    /// startup, since this core treats configuration sourcing as an external concern (spec §1).
    ///
    /// Runs `env_config::load_and_apply` first so `.env`/XDG `config.toml` values are
    /// visible to the env lookups below; a missing or unreadable config source is not
    /// fatal here, since an already-set process env is what this core actually requires.
    pub fn from_env() -> Self {
        let _ = env_config::load_and_apply("idp-core", None);
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("AGENT_MODEL_ID") {
            cfg.model_id = v;
        }
        if let Some(v) = env_u32("AGENT_MAX_TOKENS") {
            cfg.max_tokens = v;
        }
        if let Some(v) = env_secs("AGENT_MODEL_TIMEOUT") {
            cfg.model_timeout = v;
        }
        if let Some(v) = env_u32("AGENT_MAX_RETRIES") {
            cfg.max_retries = v;
        }
        if let Some(v) = env_usize("AGENT_SUMMARIZATION_THRESHOLD") {
            cfg.summarization_threshold = v;
        }
        if let Some(v) = env_usize("AGENT_MAX_CONVERSATION_MESSAGES") {
            cfg.max_conversation_messages = v;
        }
        if let Some(v) = env_usize("AGENT_MAX_THREADS") {
            cfg.max_threads = v;
        }
        if let Some(v) = env_usize("AGENT_MAX_MESSAGES_PER_THREAD") {
            cfg.max_messages_per_thread = v;
        }
        if let Some(v) = env_secs("AGENT_MCP_HEALTH_CHECK_TIMEOUT") {
            cfg.mcp_health_check_timeout = v;
        }
        if let Some(v) = env_u32("AGENT_MCP_RETRY_ATTEMPTS") {
            cfg.mcp_retry_attempts = v;
        }
        if let Some(v) = env_secs("AGENT_CONVERSATION_TTL") {
            cfg.conversation_ttl = v;
        }
        if let Some(v) = env_usize("AGENT_REF_IMAGE_MAX_ATTACH") {
            cfg.ref_image_max_attach = v;
        }
        if let Some(v) = env_usize("AGENT_REF_IMAGE_MAX_BASE64_LEN") {
            cfg.ref_image_max_base64_len = v;
        }
        if let Some(v) = env_usize("AGENT_MAX_CONTENT_LEN") {
            cfg.max_content_len = v;
        }
        if let Some(v) = env_usize("AGENT_DEEP_RESEARCH_BATCH_SIZE") {
            cfg.deep_research_batch_size = v;
        }
        if let Some(v) = env_usize("AGENT_DEEP_RESEARCH_NUM_WORKERS") {
            cfg.deep_research_num_workers = v;
        }
        if let Some(v) = env_usize("AGENT_DEEP_RESEARCH_MAX_CONCURRENT") {
            cfg.deep_research_max_concurrent = v;
        }
        if let Some(v) = env_u64("AGENT_BUDGET_TOKENS") {
            cfg.budget_tokens = Some(v);
        }
        cfg
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
}
