//! Tool Registry (C1): catalog, dispatch, and result normalization.
//!
//! Grounded in the `Tool`/`ToolCallContext` shapes from the teacher's
//! `tools::Tool` trait and `tool_source::ToolCallContext`, generalized to carry
//! an [`AgentContext`] instead of a bare thread/user id pair, and extended with
//! the normalization rules and bounded result cache spec.md §4.1 requires.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::agent_context::AgentContext;
use crate::error::AgentError;
use crate::state::{is_image_url, Attachment, Reference, ToolResult, ToolSpec};

const MAX_CONTENT_LEN: usize = 32_000;
const REF_IMAGE_MAX_BASE64_LEN: usize = 500_000;
const REF_IMAGE_MAX_ATTACH: usize = 1;
const CACHE_CAPACITY: usize = 20;
/// Default for `mcp_retry_attempts` (spec §5/§7: "Tool calls: up to 3 attempts
/// on connection/timeout/SSL failures"), mirrored from `CoreConfig`'s default
/// so a registry built without an explicit config still retries correctly.
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Fixed inter-attempt pause (document_tool.py retries on `ClientOSError` /
/// `ServerDisconnectedError` / `TimeoutError` with a 0.5s sleep between
/// attempts; this registry applies the same pause regardless of which `Tool`
/// impl is being retried).
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// A named, independently implemented capability the engine can dispatch into.
///
/// Handlers return the *raw* payload (whatever the underlying tool or MCP
/// aggregator produced); the registry performs normalization (truncation,
/// reference/attachment extraction) uniformly afterward so individual tools
/// never need to duplicate that logic.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn spec(&self) -> ToolSpec;
    async fn call(&self, args: Value, ctx: &AgentContext) -> Result<Value, AgentError>;
}

struct CacheEntry {
    args: Value,
    result: ToolResult,
}

/// Catalog of registered tools plus a bounded per-registry result cache
/// (spec §4.1: "≤20-entry circular cache... cleared when `index_id` or
/// `session_id` in the agent context changes").
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    cache: std::sync::Mutex<VecDeque<CacheEntry>>,
    cache_scope: std::sync::Mutex<Option<(String, String)>>,
    retry_attempts: AtomicU32,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
            cache: std::sync::Mutex::new(VecDeque::with_capacity(CACHE_CAPACITY)),
            cache_scope: std::sync::Mutex::new(None),
            retry_attempts: AtomicU32::new(DEFAULT_RETRY_ATTEMPTS),
        }
    }

    /// Builder variant wiring `CoreConfig::mcp_retry_attempts` (or any other
    /// source) into the registry's tool-dispatch retry bound (spec §5/§7, P9).
    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        *self.retry_attempts.get_mut() = retry_attempts;
        self
    }

    /// Updates the retry bound in place, e.g. after a config reload.
    pub fn set_retry_attempts(&self, retry_attempts: u32) {
        self.retry_attempts.store(retry_attempts, Ordering::Relaxed);
    }

    pub fn register(&mut self, handler: Arc<dyn Tool>) {
        self.tools.insert(handler.name().to_string(), handler);
    }

    pub fn list(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Dispatches `name(args)` under `ctx`, normalizing the result per §4.1.
    /// Fails with [`AgentError::NotFound`] when the tool is unregistered and
    /// [`AgentError::SchemaError`] when `args` is missing a required field;
    /// any other failure (including a handler error) is captured as a
    /// `ToolResult{success: false, ..}` rather than propagated.
    ///
    /// A `TransportError`/`ModelTimeout` from the handler (connection, SSL, or
    /// timeout failure reaching the underlying tool or MCP aggregator) is
    /// retried up to `retry_attempts` times with a fixed pause between
    /// attempts (spec §5/§7: "Tool calls: up to 3 attempts on
    /// connection/timeout/SSL failures"; P9: at most `1 + max_retries` calls)
    /// before the final attempt's error is captured as a failed `ToolResult`.
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        ctx: &AgentContext,
    ) -> Result<ToolResult, AgentError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::NotFound(format!("unknown tool '{name}'")))?
            .clone();

        validate_required_fields(name, &tool.spec().input_schema, &args)?;
        self.maybe_clear_cache(ctx);

        let max_retries = self.retry_attempts.load(Ordering::Relaxed);
        let started = Instant::now();
        let mut attempt = 0u32;
        let mut result = loop {
            match tool.call(args.clone(), ctx).await {
                Ok(raw) => break normalize(&raw, name),
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => break ToolResult::failure(err.to_string()),
            }
        };
        result.execution_time_s = started.elapsed().as_secs_f64();

        self.remember(args, result.clone());
        Ok(result)
    }

    fn maybe_clear_cache(&self, ctx: &AgentContext) {
        let scope_key = (ctx.index_id.clone(), ctx.session_id.clone());
        let mut scope = self.cache_scope.lock().expect("cache_scope lock poisoned");
        if scope.as_ref() != Some(&scope_key) {
            self.cache.lock().expect("cache lock poisoned").clear();
            *scope = Some(scope_key);
        }
    }

    fn remember(&self, args: Value, result: ToolResult) {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        if cache.len() == CACHE_CAPACITY {
            cache.pop_front();
        }
        cache.push_back(CacheEntry { args, result });
    }

    /// Returns the most recent cached result for `args`, if any (observability
    /// / reuse; not consulted automatically by `invoke`).
    pub fn recall(&self, args: &Value) -> Option<ToolResult> {
        let cache = self.cache.lock().expect("cache lock poisoned");
        cache
            .iter()
            .rev()
            .find(|entry| &entry.args == args)
            .map(|entry| entry.result.clone())
    }
}

/// Checks the shallow `required` list of a JSON-schema-shaped `input_schema`
/// against `args`. This core doesn't carry a full JSON Schema validator
/// (schema content is the caller's concern); it enforces only what spec §4.1
/// demands: that required arguments are present.
fn validate_required_fields(tool_name: &str, schema: &Value, args: &Value) -> Result<(), AgentError> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    for field in required {
        let Some(field) = field.as_str() else { continue };
        if args.get(field).is_none() {
            return Err(AgentError::SchemaError {
                tool: tool_name.to_string(),
                message: format!("missing required field '{field}'"),
            });
        }
    }
    Ok(())
}

/// Applies spec.md §4.1's normalization rules to a handler's raw output.
fn normalize(raw: &Value, tool_name: &str) -> ToolResult {
    let payload = unwrap_api_response(raw);

    let success = payload
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let error = payload
        .get("error")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    let text = extract_text(&payload);
    let message = truncate(&text, MAX_CONTENT_LEN);
    let references = extract_references(&payload, tool_name);
    let attachments = extract_attachments(&payload);

    let data = payload
        .as_object()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .collect();

    ToolResult {
        success,
        message,
        data,
        references,
        attachments,
        error,
        execution_time_s: 0.0,
    }
}

/// Resolved Open Question: unwrap a top-level `api_response` envelope if
/// present, before any other normalization runs (SPEC_FULL §4 C1 supplement).
fn unwrap_api_response(raw: &Value) -> Value {
    match raw.get("api_response") {
        Some(inner) => inner.clone(),
        None => raw.clone(),
    }
}

fn extract_text(payload: &Value) -> String {
    if let Some(s) = payload.get("content").and_then(Value::as_str) {
        return s.to_string();
    }
    if let Some(s) = payload.get("message").and_then(Value::as_str) {
        return s.to_string();
    }
    if let Some(results) = payload.get("results").and_then(Value::as_array) {
        return results
            .iter()
            .filter_map(|r| r.as_str().map(str::to_string).or_else(|| Some(r.to_string())))
            .collect::<Vec<_>>()
            .join("\n");
    }
    String::new()
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        text.chars().take(max_len).collect()
    }
}

fn extract_references(payload: &Value, tool_name: &str) -> Vec<Reference> {
    let list = payload
        .get("references")
        .and_then(Value::as_array)
        .or_else(|| payload.pointer("/data/references").and_then(Value::as_array));

    let Some(list) = list else {
        return Vec::new();
    };

    list.iter()
        .enumerate()
        .filter_map(|(i, item)| reference_from_value(item, i, tool_name))
        .collect()
}

fn reference_from_value(item: &Value, index: usize, tool_name: &str) -> Option<Reference> {
    let id = format!("{tool_name}-ref-{index}");
    if let Some(s) = item.as_str() {
        return Some(Reference::from_title_url_string(id, s, tool_name));
    }
    let obj = item.as_object()?;
    let title = obj.get("title").and_then(Value::as_str).unwrap_or("").to_string();
    let value = obj.get("value").and_then(Value::as_str).unwrap_or("").to_string();
    let kind = if is_image_url(&value) {
        crate::state::ReferenceType::Image
    } else {
        crate::state::ReferenceType::Document
    };
    let mut metadata: HashMap<String, Value> = obj
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .collect();
    metadata.insert("tool".to_string(), Value::String(tool_name.to_string()));
    metadata.insert("source".to_string(), Value::String("tool_execution".to_string()));
    Some(Reference {
        id: obj
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(id),
        kind,
        title,
        display_name: obj
            .get("display_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        value,
        metadata,
    })
}

fn extract_attachments(payload: &Value) -> Vec<Attachment> {
    let Some(list) = payload.get("attachments").and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|a| {
            let obj = a.as_object()?;
            if obj.get("type").and_then(Value::as_str) != Some("image") {
                return None;
            }
            let data = obj.get("data").and_then(Value::as_str)?.to_string();
            if data.len() > REF_IMAGE_MAX_BASE64_LEN {
                return None;
            }
            Some(Attachment {
                kind: "image".to_string(),
                media_type: obj
                    .get("media_type")
                    .and_then(Value::as_str)
                    .unwrap_or("image/png")
                    .to_string(),
                data,
            })
        })
        .take(REF_IMAGE_MAX_ATTACH)
        .collect()
}
