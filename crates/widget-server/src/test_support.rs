//! Fakes shared by the handler and pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::{json, Value};
use widget_core::tools::{FunctionCall, ToolCall, ToolSchema};
use widget_core::{JsonlConversationStore, Message};
use widget_llm::{
    GenerationConfig, LLMChunk, LLMError, LLMProvider, LLMStream, ProviderKind,
};
use widget_mcp::{
    BrokerConfig, ConnectionBroker, McpCallResult, McpConnection, McpConnector, McpContentItem,
    McpError, McpServerDescriptor, McpToolAggregator, McpTool,
};

use crate::state::{AppState, ProviderSource};
use crate::widgets::{WidgetConfig, WidgetStore};

pub const TOOLS_URL: &str = "http://tools.test/sse";
pub const DOWN_URL: &str = "http://down.test/sse";

/// Serves one tool, `lookup`, at [`TOOLS_URL`]; every other url refuses.
#[derive(Default)]
pub struct FakeConnector {
    closes: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct FakeConnection {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl McpConnection for FakeConnection {
    async fn list_tools(&self) -> widget_mcp::Result<Vec<McpTool>> {
        Ok(vec![McpTool {
            name: "lookup".to_string(),
            description: "Look things up".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> widget_mcp::Result<McpCallResult> {
        Ok(McpCallResult {
            content: vec![McpContentItem::Text {
                text: format!("{}:{}", name, arguments),
            }],
            is_error: false,
        })
    }

    async fn close(&self) -> widget_mcp::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl McpConnector for FakeConnector {
    async fn connect(
        &self,
        descriptor: &McpServerDescriptor,
    ) -> widget_mcp::Result<Arc<dyn McpConnection>> {
        if descriptor.url == TOOLS_URL {
            Ok(Arc::new(FakeConnection {
                closes: self.closes.clone(),
            }))
        } else {
            Err(McpError::Connection(format!("{} refused", descriptor.url)))
        }
    }
}

enum Script {
    Steps(Mutex<VecDeque<Vec<LLMChunk>>>),
    Hang,
    Fail,
}

/// Replays canned steps and records the tool names it was offered.
pub struct ScriptedProvider {
    script: Script,
    pub seen_tools: Mutex<Vec<Option<Vec<String>>>>,
    pub seen_messages: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    fn with_script(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            seen_tools: Mutex::new(Vec::new()),
            seen_messages: Mutex::new(Vec::new()),
        })
    }

    pub fn steps(steps: Vec<Vec<LLMChunk>>) -> Arc<Self> {
        Self::with_script(Script::Steps(Mutex::new(steps.into())))
    }

    pub fn text(text: &str) -> Arc<Self> {
        Self::steps(vec![vec![LLMChunk::Token(text.to_string()), LLMChunk::Done]])
    }

    /// Calls `lookup` once, then answers with `text`.
    pub fn tool_then_text(text: &str) -> Arc<Self> {
        Self::steps(vec![
            vec![
                LLMChunk::ToolCalls(vec![ToolCall {
                    id: "call_1".to_string(),
                    tool_type: "function".to_string(),
                    function: FunctionCall {
                        name: "lookup".to_string(),
                        arguments: "{}".to_string(),
                    },
                }]),
                LLMChunk::Done,
            ],
            vec![LLMChunk::Token(text.to_string()), LLMChunk::Done],
        ])
    }

    pub fn hanging() -> Arc<Self> {
        Self::with_script(Script::Hang)
    }

    pub fn failing() -> Arc<Self> {
        Self::with_script(Script::Fail)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
        _max_output_tokens: Option<u32>,
        _model: Option<&str>,
    ) -> widget_llm::provider::Result<LLMStream> {
        self.seen_tools.lock().unwrap().push(
            tools.map(|tools| tools.iter().map(|t| t.function.name.clone()).collect()),
        );
        self.seen_messages.lock().unwrap().push(messages.to_vec());

        match &self.script {
            Script::Steps(steps) => {
                let step = steps.lock().unwrap().pop_front().unwrap_or_default();
                Ok(Box::pin(stream::iter(step.into_iter().map(Ok::<LLMChunk, LLMError>))))
            }
            Script::Hang => Ok(Box::pin(
                stream::pending::<widget_llm::provider::Result<LLMChunk>>(),
            )),
            Script::Fail => Err(LLMError::Api("HTTP 500: upstream exploded".to_string())),
        }
    }
}

/// Always hands out the same provider, whatever the widget asks for.
pub struct FixedProvider(pub Arc<dyn LLMProvider>);

impl ProviderSource for FixedProvider {
    fn provider(&self, _kind: ProviderKind) -> Result<Arc<dyn LLMProvider>, LLMError> {
        Ok(self.0.clone())
    }
}

pub fn widget(id: u64, servers: &[&str]) -> WidgetConfig {
    WidgetConfig {
        id,
        name: format!("Widget {}", id),
        description: None,
        system_prompt: Some("You are the support bot.".to_string()),
        default_provider: "openai".to_string(),
        position: "bottom-right".to_string(),
        size: "md".to_string(),
        mcp_servers: servers.iter().map(|url| json!({ "url": url })).collect(),
    }
}

pub async fn test_state_with_widgets(
    connector: Arc<FakeConnector>,
    provider: Arc<ScriptedProvider>,
    widgets: Vec<WidgetConfig>,
) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonlConversationStore::new(dir.path());
    store.init().await.unwrap();

    let broker = ConnectionBroker::new(connector, BrokerConfig::default());
    let state = AppState {
        widgets: WidgetStore::from_widgets(widgets).unwrap(),
        conversations: Arc::new(store),
        aggregator: Arc::new(McpToolAggregator::new(broker)),
        providers: Arc::new(FixedProvider(provider)),
        generation: GenerationConfig::default(),
    };
    (state, dir)
}

pub async fn test_state(
    connector: Arc<FakeConnector>,
    provider: Arc<ScriptedProvider>,
) -> (AppState, tempfile::TempDir) {
    test_state_with_widgets(connector, provider, Vec::new()).await
}
