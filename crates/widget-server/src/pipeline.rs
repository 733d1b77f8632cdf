//! Runs one chat request end to end: brings the MCP tools up, streams the
//! generation to the client, and tears the tools down on every exit path.

use std::sync::Arc;

use actix_web::web::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use widget_core::tools::ToolExecutor;
use widget_core::{ChatEvent, ConversationStore, Message, Role, StoredMessage};
use widget_llm::{stream_text, GenerationConfig, GenerationError, LLMProvider};
use widget_mcp::{McpClients, McpServerDescriptor, McpToolAggregator};

use crate::state::AppState;

pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred during the conversation.";
const EVENT_BUFFER: usize = 100;

pub struct ChatJob {
    /// Used as the log prefix.
    pub label: String,
    pub provider: Arc<dyn LLMProvider>,
    pub messages: Vec<Message>,
    /// Already normalized; invalid entries were dropped by the handler.
    pub servers: Vec<McpServerDescriptor>,
    /// Where the assistant answer is recorded, if anywhere.
    pub conversation_id: Option<String>,
}

/// Spawn the chat task and return its SSE body.
///
/// Dropping the body before the final event cancels the request, which
/// tears the MCP connections down without waiting for the task.
pub fn start_chat(
    state: &AppState,
    job: ChatJob,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> + 'static {
    let cancel = CancellationToken::new();
    let (events_tx, mut events_rx) = mpsc::channel::<ChatEvent>(EVENT_BUFFER);

    tokio::spawn(run_chat(
        state.aggregator.clone(),
        state.conversations.clone(),
        state.generation.clone(),
        job,
        events_tx,
        cancel.clone(),
    ));

    let guard = cancel.drop_guard();

    async_stream::stream! {
        while let Some(event) = events_rx.recv().await {
            let terminal = event.is_terminal();
            match serde_json::to_string(&event) {
                Ok(json) => {
                    yield Ok::<_, actix_web::Error>(Bytes::from(format!("data: {}\n\n", json)));
                }
                Err(e) => warn!("Failed to serialize chat event: {}", e),
            }
            if terminal {
                break;
            }
        }
        guard.disarm();
    }
}

async fn run_chat(
    aggregator: Arc<McpToolAggregator>,
    conversations: Arc<dyn ConversationStore>,
    config: GenerationConfig,
    job: ChatJob,
    events: mpsc::Sender<ChatEvent>,
    cancel: CancellationToken,
) {
    let label = job.label;
    let clients: McpClients = aggregator
        .initialize_descriptors(&job.servers, Some(cancel.clone()))
        .await
        .into();

    for skipped in &clients.skipped {
        warn!("[{}] MCP server {} skipped: {}", label, skipped.url, skipped.reason);
    }
    if let Some(tools) = &clients.tools {
        info!("[{}] {} MCP tool(s) available", label, tools.len());
    }

    let tools = clients
        .tools
        .clone()
        .map(|tools| tools as Arc<dyn ToolExecutor>);

    let result = stream_text(
        job.provider,
        job.messages,
        tools,
        events.clone(),
        cancel.clone(),
        config,
    )
    .await;

    match result {
        Ok(output) => {
            if let Some(conversation_id) = job.conversation_id.as_deref() {
                let message =
                    StoredMessage::new(conversation_id, Role::Assistant, output.text.clone());
                if let Err(e) = conversations.append_message(&message).await {
                    error!("[{}] Failed to store assistant message: {}", label, e);
                }
            }
            clients.cleanup.run().await;
            let _ = events
                .send(ChatEvent::Finish {
                    text: output.text,
                    steps: output.steps,
                })
                .await;
        }
        Err(GenerationError::Cancelled) => {
            info!("[{}] Request aborted, cleaning up", label);
            clients.cleanup.run().await;
        }
        Err(e) => {
            error!("[{}] Generation failed: {}", label, e);
            clients.cleanup.run().await;
            let _ = events
                .send(ChatEvent::Error {
                    message: GENERIC_ERROR_MESSAGE.to_string(),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::test_support::{test_state, FakeConnector, ScriptedProvider, TOOLS_URL};

    fn job(provider: Arc<dyn LLMProvider>) -> ChatJob {
        ChatJob {
            label: "test".to_string(),
            provider,
            messages: vec![Message::user("Hi")],
            servers: vec![McpServerDescriptor::sse(TOOLS_URL)],
            conversation_id: None,
        }
    }

    #[tokio::test]
    async fn finish_is_sent_after_teardown() {
        let connector = FakeConnector::new();
        let (state, _dir) = test_state(connector.clone(), ScriptedProvider::text("Hello")).await;

        let body: Vec<Bytes> = start_chat(&state, job(ScriptedProvider::text("Hello")))
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        let last = String::from_utf8(body.last().unwrap().to_vec()).unwrap();
        assert!(last.contains("\"type\":\"finish\""));
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn dropping_the_body_tears_down_tools() {
        let connector = FakeConnector::new();
        let (state, _dir) = test_state(connector.clone(), ScriptedProvider::hanging()).await;

        let mut body = Box::pin(start_chat(&state, job(ScriptedProvider::hanging())));
        let first = tokio::time::timeout(Duration::from_millis(200), body.next()).await;
        assert!(first.is_err(), "hanging provider should not produce events");
        drop(body);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while connector.close_count() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn failure_is_reported_generically() {
        let connector = FakeConnector::new();
        let (state, _dir) = test_state(connector.clone(), ScriptedProvider::failing()).await;

        let body: Vec<Bytes> = start_chat(&state, job(ScriptedProvider::failing()))
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        let text: String = body
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).to_string())
            .collect();
        assert!(text.contains(GENERIC_ERROR_MESSAGE));
        assert!(!text.contains("HTTP 500"));
        assert_eq!(connector.close_count(), 1);
    }
}
