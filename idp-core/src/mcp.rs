//! MCP aggregator client (C1/C2 supplement): speaks Streamable HTTP JSON-RPC
//! to the remote tool aggregator the spec glossary calls "the external service
//! this core speaks to for listing and invoking named tools".
//!
//! Grounded in the teacher's `tool_source::mcp` module (`McpHttpSession`,
//! `McpToolSource`): same initialize handshake, same `tools/list`/`tools/call`
//! JSON-RPC mapping, trimmed to the HTTP transport only. This core runs as a
//! long-lived service behind a fixed aggregator URL, so the teacher's stdio
//! transport (spawning a local MCP server subprocess, used by its CLI) has no
//! counterpart here.

use std::sync::Mutex;

use async_trait::async_trait;
use mcp_core::{ErrorObject, MessageId, NotificationMessage, RequestMessage, ResultMessage};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent_context::AgentContext;
use crate::error::AgentError;
use crate::health::ToolLister;
use crate::state::ToolSpec;
use crate::tool::{Tool, ToolRegistry};

const MCP_PROTOCOL_VERSION: &str = "2025-11-25";
const INITIALIZE_REQUEST_ID: &str = "idp-core-mcp-initialize";

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: Option<MessageId>,
    result: Option<Value>,
    error: Option<JsonRpcErrorBody>,
}

fn parse_json_rpc_from_body(
    body: &str,
    content_type: Option<&reqwest::header::HeaderValue>,
) -> Result<JsonRpcResponse, AgentError> {
    let is_sse = content_type
        .and_then(|v| v.to_str().ok())
        .map(|s| s.contains("text/event-stream"))
        .unwrap_or(false);

    if !is_sse {
        return serde_json::from_str(body)
            .map_err(|e| AgentError::TransportError(format!("mcp response json: {e}")));
    }

    let mut data_buffer = String::new();
    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            if data == "[DONE]" || data.is_empty() {
                if !data_buffer.is_empty() {
                    if let Ok(r) = serde_json::from_str::<JsonRpcResponse>(&data_buffer) {
                        if r.result.is_some() || r.error.is_some() {
                            return Ok(r);
                        }
                    }
                    data_buffer.clear();
                }
                continue;
            }
            if data_buffer.is_empty() {
                data_buffer = data.to_string();
            } else {
                data_buffer.push('\n');
                data_buffer.push_str(data);
            }
        } else if line.trim().is_empty() && !data_buffer.is_empty() {
            if let Ok(r) = serde_json::from_str::<JsonRpcResponse>(&data_buffer) {
                if r.result.is_some() || r.error.is_some() {
                    return Ok(r);
                }
            }
            data_buffer.clear();
        }
    }
    if !data_buffer.is_empty() {
        if let Ok(r) = serde_json::from_str::<JsonRpcResponse>(&data_buffer) {
            if r.result.is_some() || r.error.is_some() {
                return Ok(r);
            }
        }
    }
    Err(AgentError::TransportError(
        "mcp sse stream: no json-rpc response found".into(),
    ))
}

/// One MCP aggregator reached over Streamable HTTP.
///
/// `new` performs the initialize handshake once and caches the resulting
/// `MCP-Session-Id` (if the server issues one) for every subsequent request.
pub struct McpHttpClient {
    client: Client,
    url: String,
    headers: Vec<(String, String)>,
    session_id: Mutex<Option<String>>,
}

impl McpHttpClient {
    pub async fn new(
        url: impl Into<String>,
        headers: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
        connect_timeout: std::time::Duration,
    ) -> Result<Self, AgentError> {
        let url = url.into();
        let headers: Vec<(String, String)> = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let client = Client::builder()
            .timeout(connect_timeout)
            .build()
            .map_err(|e| AgentError::TransportError(e.to_string()))?;
        let mut mcp = Self {
            client,
            url,
            headers,
            session_id: Mutex::new(None),
        };
        mcp.initialize().await?;
        Ok(mcp)
    }

    async fn initialize(&mut self) -> Result<(), AgentError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": "idp-core", "version": env!("CARGO_PKG_VERSION") }
        });
        let request = RequestMessage::new(INITIALIZE_REQUEST_ID, "initialize", params);
        let body = serde_json::to_vec(&request).map_err(|e| AgentError::TransportError(e.to_string()))?;

        let resp = self
            .post(body)
            .await
            .map_err(|e| AgentError::TransportError(e.to_string()))?;
        let status = resp.status();
        if let Some(id) = resp
            .headers()
            .get("MCP-Session-Id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().expect("mcp session_id lock poisoned") = Some(id.to_string());
        }
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::TransportError(format!("mcp initialize HTTP {status}: {text}")));
        }
        let content_type = resp.headers().get("content-type").cloned();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::TransportError(e.to_string()))?;
        let _: JsonRpcResponse = parse_json_rpc_from_body(&text, content_type.as_ref())?;

        let notification = NotificationMessage::new("notifications/initialized", Some(json!({})));
        let notif_body =
            serde_json::to_vec(&notification).map_err(|e| AgentError::TransportError(e.to_string()))?;
        let resp2 = self
            .post(notif_body)
            .await
            .map_err(|e| AgentError::TransportError(e.to_string()))?;
        let status2 = resp2.status();
        if status2 != reqwest::StatusCode::ACCEPTED && !status2.is_success() {
            let text = resp2.text().await.unwrap_or_default();
            return Err(AgentError::TransportError(format!(
                "mcp notifications/initialized HTTP {status2}: {text}"
            )));
        }
        Ok(())
    }

    async fn post(&self, body: Vec<u8>) -> Result<reqwest::Response, reqwest::Error> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION)
            .body(body);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(sid) = self.session_id.lock().expect("mcp session_id lock poisoned").clone() {
            req = req.header("MCP-Session-Id", sid);
        }
        req.send().await
    }

    async fn request(&self, id: &str, method: &str, params: Value) -> Result<ResultMessage, AgentError> {
        let request = RequestMessage::new(id, method, params);
        let body = serde_json::to_vec(&request).map_err(|e| AgentError::TransportError(e.to_string()))?;
        let resp = self.post(body).await.map_err(|e| AgentError::TransportError(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::TransportError(format!("mcp {method} HTTP {status}: {text}")));
        }
        let content_type = resp.headers().get("content-type").cloned();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::TransportError(e.to_string()))?;
        let json = parse_json_rpc_from_body(&text, content_type.as_ref())?;
        let msg_id = json.id.unwrap_or_else(|| MessageId::from(id));
        if let Some(err) = json.error {
            let err_obj = ErrorObject::new(err.code as i32, err.message, None);
            return Ok(ResultMessage::failure(msg_id, err_obj));
        }
        Ok(ResultMessage::success(msg_id, json.result.unwrap_or(Value::Null)))
    }

    /// Sends `tools/list` and maps the result to this core's [`ToolSpec`].
    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, AgentError> {
        let result = self
            .request("idp-core-tools-list", "tools/list", Value::Object(serde_json::Map::new()))
            .await?;
        if let Some(err) = result.error {
            return Err(AgentError::TransportError(err.message));
        }
        let tools = result
            .result
            .and_then(|r| r.get("tools").cloned())
            .and_then(|v| v.as_array().cloned())
            .ok_or_else(|| AgentError::TransportError("mcp tools/list: no tools in response".into()))?;
        Ok(tools
            .into_iter()
            .filter_map(|t| {
                let obj = t.as_object()?;
                Some(ToolSpec {
                    name: obj.get("name")?.as_str()?.to_string(),
                    description: obj
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    input_schema: obj
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or(Value::Object(serde_json::Map::new())),
                    supports_agent_context: false,
                })
            })
            .collect())
    }

    /// Sends `tools/call` and flattens the MCP content blocks into the
    /// `{"content": "..."}` shape [`crate::tool::ToolRegistry`]'s normalizer expects.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, AgentError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self
            .request(&format!("idp-core-call-{name}"), "tools/call", params)
            .await?;
        if let Some(err) = result.error {
            return Err(AgentError::ToolError {
                tool: name.to_string(),
                message: err.message,
            });
        }
        let result_value = result
            .result
            .ok_or_else(|| AgentError::TransportError(format!("mcp tools/call '{name}': no result")))?;

        if result_value.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            let msg = result_value
                .get("content")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(|b| b.get("text").and_then(Value::as_str))
                .unwrap_or("mcp tool returned error")
                .to_string();
            return Err(AgentError::ToolError { tool: name.to_string(), message: msg });
        }

        let mut text_parts = Vec::new();
        if let Some(content) = result_value.get("content").and_then(Value::as_array) {
            for block in content {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text_parts.push(t);
                    }
                }
            }
        }
        let mut text = text_parts.join("\n");
        if text.is_empty() {
            if let Some(structured) = result_value.get("structuredContent") {
                text = serde_json::to_string(structured).unwrap_or_default();
            }
        }
        Ok(json!({ "content": text }))
    }
}

#[async_trait]
impl ToolLister for McpHttpClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, AgentError> {
        McpHttpClient::list_tools(self).await
    }
}

/// Makes one MCP-aggregator tool implement [`Tool`] so it can sit in the same
/// [`ToolRegistry`] as locally-implemented tools; `call` delegates to the
/// shared [`McpHttpClient`]. Mirrors the teacher's `McpToolAdapter`.
pub struct McpTool {
    spec: ToolSpec,
    client: std::sync::Arc<McpHttpClient>,
}

impl McpTool {
    pub fn new(spec: ToolSpec, client: std::sync::Arc<McpHttpClient>) -> Self {
        Self { spec, client }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn call(&self, args: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
        self.client.call_tool(&self.spec.name, args).await
    }
}

/// Lists tools from `client` and registers one [`McpTool`] per tool into `registry`.
/// Call once at startup after the local (non-MCP) tools, if any, are registered.
pub async fn register_mcp_tools(
    registry: &mut ToolRegistry,
    client: std::sync::Arc<McpHttpClient>,
) -> Result<(), AgentError> {
    let specs = client.list_tools().await?;
    for spec in specs {
        registry.register(std::sync::Arc::new(McpTool::new(spec, std::sync::Arc::clone(&client))));
    }
    Ok(())
}
