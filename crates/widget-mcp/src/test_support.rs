//! In-memory MCP connections for unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::broker::{McpConnection, McpConnector};
use crate::config::McpServerDescriptor;
use crate::error::{McpError, Result};
use crate::types::{McpCallResult, McpContentItem, McpTool};

pub fn tool(name: &str) -> McpTool {
    McpTool {
        name: name.to_string(),
        description: format!("{} tool", name),
        parameters: json!({ "type": "object", "properties": {} }),
    }
}

#[derive(Default)]
pub struct FakeConnection {
    pub url: String,
    pub tools: Vec<McpTool>,
    manifest_error: bool,
    close_error: bool,
    closes: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeConnection {
    pub fn new(url: &str, tool_names: &[&str]) -> Self {
        Self {
            url: url.to_string(),
            tools: tool_names.iter().map(|name| tool(name)).collect(),
            ..Self::default()
        }
    }

    pub fn with_manifest_error(mut self) -> Self {
        self.manifest_error = true;
        self
    }

    pub fn with_close_error(mut self) -> Self {
        self.close_error = true;
        self
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpConnection for FakeConnection {
    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        if self.manifest_error {
            return Err(McpError::Protocol("bad manifest".to_string()));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpCallResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(McpCallResult {
            content: vec![McpContentItem::Text {
                text: format!("{}:{}:{}", self.url, name, arguments),
            }],
            is_error: name == "broken",
        })
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.close_error {
            return Err(McpError::Transport("close failed".to_string()));
        }
        Ok(())
    }
}

pub enum Plan {
    Ready(Arc<FakeConnection>),
    Delayed(Duration, Arc<FakeConnection>),
    Refuse,
    Hang,
}

#[derive(Default)]
pub struct FakeConnector {
    plans: HashMap<String, Plan>,
}

impl FakeConnector {
    pub fn with(mut self, url: &str, plan: Plan) -> Self {
        self.plans.insert(url.to_string(), plan);
        self
    }
}

#[async_trait]
impl McpConnector for FakeConnector {
    async fn connect(&self, descriptor: &McpServerDescriptor) -> Result<Arc<dyn McpConnection>> {
        match self.plans.get(&descriptor.url) {
            Some(Plan::Ready(connection)) => Ok(connection.clone() as Arc<dyn McpConnection>),
            Some(Plan::Delayed(delay, connection)) => {
                tokio::time::sleep(*delay).await;
                Ok(connection.clone() as Arc<dyn McpConnection>)
            }
            Some(Plan::Hang) => futures::future::pending().await,
            Some(Plan::Refuse) | None => Err(McpError::Connection(format!(
                "connection refused: {}",
                descriptor.url
            ))),
        }
    }
}
