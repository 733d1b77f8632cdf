//! Anthropic Messages API provider.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;
use widget_core::tools::{FunctionCall, ToolCall, ToolSchema};
use widget_core::{Message, Role};

use crate::provider::{LLMError, LLMProvider, LLMStream, Result};
use crate::types::LLMChunk;

use super::common::sse::llm_stream_from_sse;

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| LLMError::Auth(format!("Invalid API key: {}", e)))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
        max_output_tokens: Option<u32>,
        model: Option<&str>,
    ) -> Result<LLMStream> {
        let model = model.unwrap_or(&self.model);
        let max_tokens = max_output_tokens.unwrap_or(self.max_tokens);
        debug!(
            "Anthropic request: model={}, {} messages",
            model,
            messages.len()
        );

        let body = build_anthropic_request(messages, tools, model, max_tokens);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .headers(self.build_headers()?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;

            if status == 401 || status == 403 {
                return Err(LLMError::Auth(format!(
                    "Anthropic authentication failed: {}",
                    text
                )));
            }

            return Err(LLMError::Api(format!(
                "Anthropic API error: HTTP {}: {}",
                status, text
            )));
        }

        let mut state = AnthropicStreamState::default();
        Ok(llm_stream_from_sse(response, move |event, data| {
            parse_anthropic_sse_event(&mut state, event, data)
        }))
    }
}

/// Build a streaming Messages API body. System messages move to the
/// top-level `system` field; `tools` is left out when there are none.
pub fn build_anthropic_request(
    messages: &[Message],
    tools: Option<&[ToolSchema]>,
    model: &str,
    max_tokens: u32,
) -> Value {
    let (system, anthropic_messages) = messages_to_anthropic_json(messages);

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "stream": true,
        "messages": anthropic_messages,
    });

    if let Some(system) = system {
        body["system"] = json!(system);
    }

    if let Some(tools) = tools.filter(|tools| !tools.is_empty()) {
        body["tools"] = Value::Array(tools.iter().map(tool_to_anthropic_json).collect());
    }

    body
}

fn messages_to_anthropic_json(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        match m.role {
            Role::System => system_parts.push(m.content.as_str()),
            Role::User => out.push(json!({
                "role": "user",
                "content": [{ "type": "text", "text": m.content }],
            })),
            Role::Assistant => {
                let mut blocks: Vec<Value> = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": m.content }));
                }
                for tc in m.tool_calls.iter().flatten() {
                    blocks.push(tool_call_to_tool_use_block(tc));
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                    "content": m.content,
                });
                // Results of one assistant turn share a single user message.
                match out.last_mut() {
                    Some(last) if is_tool_result_message(last) => {
                        if let Some(content) = last["content"].as_array_mut() {
                            content.push(block);
                        }
                    }
                    _ => out.push(json!({ "role": "user", "content": [block] })),
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, out)
}

fn is_tool_result_message(message: &Value) -> bool {
    message["role"] == "user"
        && message["content"]
            .as_array()
            .map(|blocks| {
                !blocks.is_empty() && blocks.iter().all(|b| b["type"] == "tool_result")
            })
            .unwrap_or(false)
}

fn tool_call_to_tool_use_block(tool_call: &ToolCall) -> Value {
    let input: Value = if tool_call.function.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&tool_call.function.arguments)
            .unwrap_or_else(|_| Value::String(tool_call.function.arguments.clone()))
    };

    json!({
        "type": "tool_use",
        "id": tool_call.id,
        "name": tool_call.function.name,
        "input": input,
    })
}

fn tool_to_anthropic_json(tool: &ToolSchema) -> Value {
    json!({
        "name": tool.function.name,
        "description": tool.function.description,
        "input_schema": tool.function.parameters,
    })
}

/// Tracks open `tool_use` blocks by index so argument deltas can be tied
/// back to their call id and name.
#[derive(Default)]
pub struct AnthropicStreamState {
    tool_uses_by_index: HashMap<u64, (String, String)>,
}

pub fn parse_anthropic_sse_event(
    state: &mut AnthropicStreamState,
    event_type: &str,
    data: &str,
) -> Result<Option<LLMChunk>> {
    match event_type {
        "message_stop" => Ok(Some(LLMChunk::Done)),
        "error" => Err(LLMError::Api(format!("Anthropic error event: {data}"))),
        "content_block_start" => {
            let v: Value = serde_json::from_str(data)?;
            let index = block_index(&v, data)?;
            let block = &v["content_block"];
            if block["type"] != "tool_use" {
                return Ok(None);
            }

            let (Some(id), Some(name)) = (block["id"].as_str(), block["name"].as_str()) else {
                return Err(LLMError::Stream(format!(
                    "Anthropic tool_use block missing id or name: {data}"
                )));
            };

            state
                .tool_uses_by_index
                .insert(index, (id.to_string(), name.to_string()));

            Ok(Some(tool_call_chunk(id, name, String::new())))
        }
        "content_block_delta" => {
            let v: Value = serde_json::from_str(data)?;
            let delta = &v["delta"];

            match delta["type"].as_str().unwrap_or_default() {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or_default();
                    if text.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(LLMChunk::Token(text.to_string())))
                    }
                }
                "input_json_delta" => {
                    let index = block_index(&v, data)?;
                    let Some((id, name)) = state.tool_uses_by_index.get(&index) else {
                        return Err(LLMError::Stream(format!(
                            "Anthropic input_json_delta for unknown block {index}"
                        )));
                    };
                    let partial = delta["partial_json"].as_str().unwrap_or_default();
                    Ok(Some(tool_call_chunk(id, name, partial.to_string())))
                }
                _ => Ok(None),
            }
        }
        "content_block_stop" => {
            let v: Value = serde_json::from_str(data)?;
            if let Some(index) = v["index"].as_u64() {
                state.tool_uses_by_index.remove(&index);
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

fn block_index(v: &Value, data: &str) -> Result<u64> {
    v["index"]
        .as_u64()
        .ok_or_else(|| LLMError::Stream(format!("Anthropic event missing index: {data}")))
}

fn tool_call_chunk(id: &str, name: &str, arguments: String) -> LLMChunk {
    LLMChunk::ToolCalls(vec![ToolCall {
        id: id.to_string(),
        tool_type: "function".to_string(),
        function: FunctionCall {
            name: name.to_string(),
            arguments,
        },
    }])
}
