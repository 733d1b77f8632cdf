//! OpenAI chat-completions request bodies and stream chunk parsing.
//!
//! Bodies carry only the wire fields of a [`Message`]; the internal `id` and
//! `created_at` stay out.

use serde::Deserialize;
use serde_json::{json, Value};
use widget_core::tools::{FunctionCall, ToolCall, ToolSchema};
use widget_core::Message;

use crate::provider::Result;
use crate::types::LLMChunk;

pub fn messages_to_openai_compat_json(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut msg = json!({
                "role": m.role.as_str(),
                "content": m.content,
            });

            if let Some(tool_call_id) = &m.tool_call_id {
                msg["tool_call_id"] = json!(tool_call_id);
            }

            if let Some(tool_calls) = &m.tool_calls {
                msg["tool_calls"] = json!(tool_calls);
            }

            msg
        })
        .collect()
}

/// Build a streaming chat request body.
///
/// The `tools` key is only present when at least one tool is given.
pub fn build_openai_compat_body(
    model: &str,
    messages: &[Message],
    tools: Option<&[ToolSchema]>,
    max_output_tokens: Option<u32>,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages_to_openai_compat_json(messages),
        "stream": true,
    });

    if let Some(tools) = tools.filter(|tools| !tools.is_empty()) {
        body["tools"] = json!(tools);
    }

    if let Some(max_tokens) = max_output_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    body
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    id: Option<String>,
    #[serde(rename = "type")]
    tool_type: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Parse one `data:` payload.
///
/// `[DONE]` maps to [`LLMChunk::Done`], chunks without content to `None`, and
/// invalid JSON to an error.
pub fn parse_openai_compat_sse_data(data: &str) -> Result<Option<LLMChunk>> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(LLMChunk::Done));
    }

    let chunk: StreamChunk = serde_json::from_str(data)?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };

    if let Some(deltas) = choice.delta.tool_calls {
        let calls: Vec<ToolCall> = deltas
            .into_iter()
            .map(|tc| {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name.unwrap_or_default(), f.arguments.unwrap_or_default()),
                    None => (String::new(), String::new()),
                };
                ToolCall {
                    id: tc.id.unwrap_or_default(),
                    tool_type: tc.tool_type.unwrap_or_else(|| "function".to_string()),
                    function: FunctionCall { name, arguments },
                }
            })
            .collect();

        if !calls.is_empty() {
            return Ok(Some(LLMChunk::ToolCalls(calls)));
        }
    }

    Ok(choice
        .delta
        .content
        .filter(|content| !content.is_empty())
        .map(LLMChunk::Token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_tool() -> ToolSchema {
        ToolSchema::function(
            "search",
            "Search the docs",
            json!({ "type": "object", "properties": { "q": { "type": "string" } } }),
        )
    }

    #[test]
    fn body_omits_tools_when_absent_or_empty() {
        let messages = vec![Message::user("Hello")];

        let body = build_openai_compat_body("gpt-4o", &messages, None, None);
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], true);

        let body = build_openai_compat_body("gpt-4o", &messages, Some(&[] as &[ToolSchema]), None);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn body_includes_tools_and_max_tokens() {
        let messages = vec![Message::system("Be brief"), Message::user("Search")];
        let tools = vec![search_tool()];

        let body = build_openai_compat_body("gpt-4o", &messages, Some(tools.as_slice()), Some(512));

        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "search");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn messages_omit_internal_fields() {
        let messages = vec![
            Message::assistant(
                "",
                Some(vec![ToolCall {
                    id: "call_1".to_string(),
                    tool_type: "function".to_string(),
                    function: FunctionCall {
                        name: "search".to_string(),
                        arguments: "{}".to_string(),
                    },
                }]),
            ),
            Message::tool_result("call_1", "found it"),
        ];

        let json = messages_to_openai_compat_json(&messages);

        assert!(json[0].get("id").is_none());
        assert!(json[0].get("created_at").is_none());
        assert_eq!(json[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(json[1]["role"], "tool");
        assert_eq!(json[1]["tool_call_id"], "call_1");
    }

    #[test]
    fn parses_token_tool_calls_and_done() {
        let token = parse_openai_compat_sse_data(
            r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(token, Some(LLMChunk::Token("Hello".to_string())));

        let tools = parse_openai_compat_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"search"}}]}}]}"#,
        )
        .unwrap();
        match tools {
            Some(LLMChunk::ToolCalls(calls)) => {
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].function.name, "search");
                assert_eq!(calls[0].function.arguments, "");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }

        assert_eq!(
            parse_openai_compat_sse_data("  [DONE] ").unwrap(),
            Some(LLMChunk::Done)
        );
    }

    #[test]
    fn empty_deltas_are_skipped_and_bad_json_fails() {
        assert_eq!(
            parse_openai_compat_sse_data(r#"{"choices":[{"delta":{}}]}"#).unwrap(),
            None
        );
        assert_eq!(parse_openai_compat_sse_data(r#"{"choices":[]}"#).unwrap(), None);
        assert!(parse_openai_compat_sse_data("{not json}").is_err());
    }
}
