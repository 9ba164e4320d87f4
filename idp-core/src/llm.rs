//! Language model client abstraction (spec §6 Outbound "Language model").
//!
//! Grounded in `loom/src/llm/mod.rs`'s `LlmClient` trait (`invoke`/
//! `invoke_stream` default/`invoke_stream_with_tool_delta` default) and
//! `ToolChoiceMode`/`LlmUsage`/`LlmResponse`/`ToolCallDelta` shapes.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::message::Message;
use crate::state::ToolCall;
use crate::state::ToolSpec;
use crate::stream::MessageChunk;

/// Controls whether the model may choose freely, must avoid, or must use a
/// tool when tools are offered (spec §6: the model decides on `tool_calls`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolChoiceMode {
    #[default]
    Auto,
    None,
    Required,
}

impl std::str::FromStr for ToolChoiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" => Ok(Self::None),
            "required" => Ok(Self::Required),
            _ => Err(format!("unknown tool_choice: {s} (use auto, none, or required)")),
        }
    }
}

/// Delta for one tool call during streaming (name/arguments arrive incrementally).
#[derive(Clone, Debug)]
pub struct ToolCallDelta {
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: String,
}

/// Token usage for one model call (spec §6 Outbound: `usage {input_tokens,
/// output_tokens, total_tokens}`).
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Outcome of one model invocation.
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// A single request to the model (spec §6 wire shape): messages plus the
/// currently offered toolset (already filtered through C2's health gate).
pub struct LlmRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    pub max_tokens: u32,
    pub temperature: f32,
    pub tool_choice: ToolChoiceMode,
}

/// Model client. `MockLlm` is used in tests; `ChatOpenAI` speaks to an
/// OpenAI-compatible chat-completions endpoint via `async-openai`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, request: LlmRequest<'_>) -> Result<LlmResponse, AgentError>;

    /// Streaming variant. Default implementation calls [`Self::invoke`] and,
    /// if streaming is enabled, forwards the full content as one chunk
    /// (matches the teacher's non-streaming-capable-backend fallback).
    async fn invoke_stream(
        &self,
        request: LlmRequest<'_>,
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
    ) -> Result<LlmResponse, AgentError> {
        let has_tx = chunk_tx.is_some();
        let response = self.invoke(request).await?;
        if let (true, Some(tx)) = (has_tx, chunk_tx) {
            if !response.content.is_empty() {
                let _ = tx
                    .send(MessageChunk {
                        content: response.content.clone(),
                    })
                    .await;
            }
        }
        Ok(response)
    }

    /// Streaming variant that also reports incremental tool-call arguments.
    /// Default implementation delegates to [`Self::invoke_stream`] (no deltas emitted).
    async fn invoke_stream_with_tool_delta(
        &self,
        request: LlmRequest<'_>,
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
        _tool_delta_tx: Option<mpsc::Sender<ToolCallDelta>>,
    ) -> Result<LlmResponse, AgentError> {
        self.invoke_stream(request, chunk_tx).await
    }
}

/// Fixed-response client for tests and examples.
pub struct MockLlm {
    content: String,
    tool_calls: Vec<ToolCall>,
}

impl MockLlm {
    pub fn with_no_tool_calls(content: impl Into<String>) -> Self {
        MockLlm {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        MockLlm {
            content: content.into(),
            tool_calls,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, _request: LlmRequest<'_>) -> Result<LlmResponse, AgentError> {
        Ok(LlmResponse {
            content: self.content.clone(),
            tool_calls: self.tool_calls.clone(),
            usage: None,
        })
    }
}

/// Chat-completions backed client (spec §6 Outbound "Language model").
pub struct ChatOpenAI {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
}

impl ChatOpenAI {
    pub fn new(model: impl Into<String>) -> Self {
        ChatOpenAI {
            client: async_openai::Client::new(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(&self, request: LlmRequest<'_>) -> Result<LlmResponse, AgentError> {
        use async_openai::types::{
            ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
            ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
            ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        };

        let mut openai_messages = Vec::with_capacity(request.messages.len());
        for message in request.messages {
            let text = message.content().as_text();
            let converted: ChatCompletionRequestMessage = match message {
                Message::System { .. } => ChatCompletionRequestSystemMessageArgs::default()
                    .content(text)
                    .build()
                    .map_err(AgentError::internal)?
                    .into(),
                Message::User { .. } => ChatCompletionRequestUserMessageArgs::default()
                    .content(text)
                    .build()
                    .map_err(AgentError::internal)?
                    .into(),
                Message::Assistant { .. } => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(text)
                    .build()
                    .map_err(AgentError::internal)?
                    .into(),
                Message::Tool { tool_call_id, .. } => ChatCompletionRequestToolMessageArgs::default()
                    .content(text)
                    .tool_call_id(tool_call_id.clone())
                    .build()
                    .map_err(AgentError::internal)?
                    .into(),
            };
            openai_messages.push(converted);
        }

        let request_body = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(openai_messages)
            .max_tokens(request.max_tokens)
            .temperature(request.temperature)
            .build()
            .map_err(AgentError::internal)?;

        let response = self
            .client
            .chat()
            .create(request_body)
            .await
            .map_err(|e| AgentError::TransportError(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Internal(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "model returned no choices",
            ))))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::Value::Null),
            })
            .collect();

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: &[Message]) -> LlmRequest<'_> {
        LlmRequest {
            messages,
            tools: &[],
            max_tokens: 4096,
            temperature: 0.0,
            tool_choice: ToolChoiceMode::Auto,
        }
    }

    /// **Scenario**: ToolChoiceMode parses the three documented string forms.
    #[test]
    fn tool_choice_mode_from_str_parses_known_values() {
        assert_eq!("auto".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::Auto);
        assert_eq!("none".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::None);
        assert_eq!("required".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::Required);
    }

    /// **Scenario**: an unrecognized tool_choice string is rejected with a helpful message.
    #[test]
    fn tool_choice_mode_from_str_rejects_unknown_value() {
        let err = "sometimes".parse::<ToolChoiceMode>().unwrap_err();
        assert!(err.contains("unknown tool_choice"));
    }

    /// **Scenario**: the default invoke_stream sends the full content as a single chunk.
    #[tokio::test]
    async fn default_invoke_stream_sends_single_chunk_when_enabled() {
        let llm = MockLlm::with_no_tool_calls("hello");
        let (tx, mut rx) = mpsc::channel(2);
        let resp = llm.invoke_stream(request(&[]), Some(tx)).await.unwrap();
        assert_eq!(resp.content, "hello");
        let chunk = rx.recv().await.expect("one chunk");
        assert_eq!(chunk.content, "hello");
    }

    /// **Scenario**: empty content produces no chunk even when a sender is provided.
    #[tokio::test]
    async fn default_invoke_stream_skips_chunk_for_empty_content() {
        let llm = MockLlm::with_no_tool_calls("");
        let (tx, mut rx) = mpsc::channel(2);
        let resp = llm.invoke_stream(request(&[]), Some(tx)).await.unwrap();
        assert!(resp.content.is_empty());
        assert!(rx.try_recv().is_err());
    }

    /// **Scenario**: MockLlm::with_tool_calls returns the configured tool calls verbatim.
    #[tokio::test]
    async fn mock_llm_returns_configured_tool_calls() {
        let llm = MockLlm::with_tool_calls(
            "",
            vec![ToolCall {
                id: "call-1".into(),
                name: "echo".into(),
                arguments: serde_json::json!({"message": "hi"}),
            }],
        );
        let resp = llm.invoke(request(&[])).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "echo");
    }
}
