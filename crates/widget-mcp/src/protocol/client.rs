use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{McpError, Result};
use crate::protocol::models::*;
use crate::types::{McpCallResult, McpTool};

/// Transport trait for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn send(&self, message: String) -> Result<()>;
    /// Waits for the next server message. `None` once the stream has ended.
    async fn receive(&self) -> Result<Option<String>>;
    fn is_connected(&self) -> bool;
}

type PendingRequests = Mutex<HashMap<u64, oneshot::Sender<Result<JsonRpcResponse>>>>;

struct Shared {
    pending: PendingRequests,
    closed: AtomicBool,
}

impl Shared {
    fn fail_pending(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, sender) in drained {
            let _ = sender.send(Err(McpError::Disconnected));
        }
    }
}

/// MCP protocol client
pub struct McpProtocolClient {
    transport: Arc<dyn McpTransport>,
    next_id: AtomicU64,
    shared: Arc<Shared>,
    message_handler: Mutex<Option<JoinHandle<()>>>,
    client_name: String,
}

impl McpProtocolClient {
    pub fn new(transport: Arc<dyn McpTransport>, client_name: impl Into<String>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
            message_handler: Mutex::new(None),
            client_name: client_name.into(),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await?;
        self.start_message_handler();
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        if let Some(handler) = self.message_handler.lock().take() {
            handler.abort();
        }
        self.shared.fail_pending();
        self.transport.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    fn start_message_handler(&self) {
        let transport = self.transport.clone();
        let shared = self.shared.clone();

        let handler = tokio::spawn(async move {
            loop {
                match transport.receive().await {
                    Ok(Some(message)) => {
                        debug!("Received message: {}", message);
                        if let Err(e) =
                            Self::handle_message(&message, &shared, transport.as_ref()).await
                        {
                            warn!("Failed to handle message: {}", e);
                        }
                    }
                    Ok(None) => {
                        debug!("MCP message stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Transport error: {}", e);
                        break;
                    }
                }
            }
            shared.fail_pending();
        });

        *self.message_handler.lock() = Some(handler);
    }

    async fn handle_message(
        message: &str,
        shared: &Shared,
        transport: &dyn McpTransport,
    ) -> Result<()> {
        let Some(incoming) = IncomingMessage::parse(message)? else {
            return Err(McpError::Protocol("Unknown message type".to_string()));
        };

        match incoming {
            IncomingMessage::Response(response) => {
                let Some(id) = response_id(&response.id) else {
                    return Err(McpError::Protocol(format!(
                        "Unexpected response id: {}",
                        response.id
                    )));
                };
                let sender = shared.pending.lock().remove(&id);
                match sender {
                    Some(sender) => {
                        let _ = sender.send(Ok(response));
                    }
                    None => debug!("Dropping response for unknown request {}", id),
                }
            }
            IncomingMessage::Request { id, method } => {
                let reply = if method == "ping" {
                    JsonRpcResponse::success(id, json!({}))
                } else {
                    JsonRpcResponse::failure(id, -32601, format!("Method not found: {}", method))
                };
                transport.send(serde_json::to_string(&reply)?).await?;
            }
            IncomingMessage::Notification(notification) => {
                debug!("Server notification: {}", notification.method);
            }
        }

        Ok(())
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout_ms: u64,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let request = JsonRpcRequest::new(id, method, params);
        let request_json = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.pending.lock().remove(&id);
            return Err(McpError::Disconnected);
        }

        if let Err(e) = self.transport.send(request_json).await {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(
            tokio::time::Duration::from_millis(timeout_ms),
            rx,
        )
        .await
        {
            Ok(Ok(response)) => response?,
            Ok(Err(_)) => return Err(McpError::Disconnected),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                return Err(McpError::Timeout(format!(
                    "{} request {} timed out after {}ms",
                    method, id, timeout_ms
                )));
            }
        };

        if let Some(error) = response.error {
            return Err(McpError::Protocol(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        response
            .result
            .ok_or_else(|| McpError::Protocol("Missing result".to_string()))
    }

    pub async fn initialize(&self, timeout_ms: u64) -> Result<McpInitializeResult> {
        let request = McpInitializeRequest::new(&self.client_name);
        let params = serde_json::to_value(request)?;

        let result = self
            .send_request("initialize", Some(params), timeout_ms)
            .await?;
        let result: McpInitializeResult = serde_json::from_value(result)?;

        let initialized = JsonRpcNotification::new("notifications/initialized");
        self.transport
            .send(serde_json::to_string(&initialized)?)
            .await?;

        Ok(result)
    }

    /// Fetch the full tool manifest, following pagination cursors.
    pub async fn list_tools(&self, timeout_ms: u64) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.send_request("tools/list", params, timeout_ms).await?;
            let page: McpToolListResult = serde_json::from_value(result)?;

            tools.extend(page.tools.into_iter().map(|t| McpTool {
                name: t.name,
                description: t.description.unwrap_or_default(),
                parameters: t
                    .input_schema
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout_ms: u64,
    ) -> Result<McpCallResult> {
        let request = McpToolCallRequest {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let params = serde_json::to_value(request)?;

        let result = self
            .send_request("tools/call", Some(params), timeout_ms)
            .await?;

        Ok(serde_json::from_value(result)?)
    }

    pub async fn ping(&self, timeout_ms: u64) -> Result<()> {
        self.send_request("ping", None, timeout_ms).await?;
        Ok(())
    }
}

impl Drop for McpProtocolClient {
    fn drop(&mut self) {
        if let Some(handler) = self.message_handler.lock().take() {
            handler.abort();
        }
    }
}

fn response_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
