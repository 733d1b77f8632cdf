use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use widget_core::tools::{parse_tool_args, ToolCall, ToolError, ToolExecutor, ToolSchema};
use widget_core::{ChatEvent, Message};

use crate::provider::LLMProvider;

use super::stream::consume_llm_stream;
use super::{GenerationConfig, GenerationError, GenerationOutput};

/// Run the generation loop until a step ends without tool calls or
/// `config.max_steps` is reached.
///
/// With `tools` set to `None` (or an executor without tools) the provider is
/// called without a tool list at all.
pub async fn stream_text(
    provider: Arc<dyn LLMProvider>,
    mut messages: Vec<Message>,
    tools: Option<Arc<dyn ToolExecutor>>,
    events: mpsc::Sender<ChatEvent>,
    cancel: CancellationToken,
    config: GenerationConfig,
) -> Result<GenerationOutput, GenerationError> {
    let schemas: Option<Vec<ToolSchema>> = tools
        .as_ref()
        .map(|tools| tools.list_tools())
        .filter(|schemas| !schemas.is_empty());
    let max_steps = config.max_steps.max(1);

    debug!(
        "Starting generation: {} messages, {} tools, max {} steps",
        messages.len(),
        schemas.as_ref().map(Vec::len).unwrap_or(0),
        max_steps
    );

    let mut text = String::new();
    let mut steps = 0usize;

    while steps < max_steps {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        steps += 1;

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            stream = provider.chat_stream(
                &messages,
                schemas.as_deref(),
                config.max_output_tokens,
                config.model.as_deref(),
            ) => stream?,
        };

        let step = consume_llm_stream(stream, &events, &cancel).await?;
        text = step.content;

        if step.tool_calls.is_empty() {
            messages.push(Message::assistant(text.clone(), None));
            break;
        }

        messages.push(Message::assistant(text.clone(), Some(step.tool_calls.clone())));

        for tool_call in &step.tool_calls {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }

            let content = run_tool_call(tool_call, tools.as_deref(), &events).await;
            messages.push(Message::tool_result(tool_call.id.clone(), content));
        }

        if steps == max_steps {
            warn!("Generation stopped after reaching {} steps", max_steps);
        }
    }

    info!("Generation finished after {} step(s)", steps);

    Ok(GenerationOutput {
        text,
        steps,
        messages,
    })
}

/// Execute one call and report it; the returned text goes back to the model.
async fn run_tool_call(
    tool_call: &ToolCall,
    tools: Option<&dyn ToolExecutor>,
    events: &mpsc::Sender<ChatEvent>,
) -> String {
    let arguments = parse_tool_args(&tool_call.function.arguments)
        .unwrap_or_else(|_| serde_json::json!({}));

    let _ = events
        .send(ChatEvent::ToolStart {
            tool_call_id: tool_call.id.clone(),
            tool_name: tool_call.function.name.clone(),
            arguments,
        })
        .await;

    let outcome = match tools {
        Some(tools) => tools.execute(tool_call).await,
        None => Err(ToolError::NotFound(tool_call.function.name.clone())),
    };

    match outcome {
        Ok(result) => {
            let content = result.result.clone();
            let _ = events
                .send(ChatEvent::ToolComplete {
                    tool_call_id: tool_call.id.clone(),
                    result,
                })
                .await;
            content
        }
        Err(error) => {
            warn!("Tool {} failed: {}", tool_call.function.name, error);
            let message = error.to_string();
            let _ = events
                .send(ChatEvent::ToolError {
                    tool_call_id: tool_call.id.clone(),
                    error: message.clone(),
                })
                .await;
            format!("Error: {message}")
        }
    }
}
