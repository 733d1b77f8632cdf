//! Aggregate tool session: one merged tool namespace per chat request plus
//! exactly-once teardown of every connection behind it.
//!
//! Teardown can be reached from three places: the caller after a successful
//! generation, the caller after a failed one, and the cancellation listener
//! registered at assembly. All of them go through [`TeardownHandle::run`], and
//! a single atomic flag decides which caller does the actual closing.

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use widget_core::ToolSchema;

use crate::broker::{McpConnection, SkippedServer, ToolSession};
use crate::error::{McpError, Result};
use crate::types::McpCallResult;

/// A tool as exposed to the generation step.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub source_url: String,
    connection: Arc<dyn McpConnection>,
}

impl ToolDefinition {
    pub fn schema(&self) -> ToolSchema {
        ToolSchema::function(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        )
    }

    pub async fn invoke(&self, arguments: Value) -> Result<McpCallResult> {
        self.connection.call_tool(&self.name, arguments).await
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("source_url", &self.source_url)
            .finish()
    }
}

/// Merged tool namespace, keyed by tool name.
#[derive(Debug)]
pub struct ToolSet {
    tools: BTreeMap<String, ToolDefinition>,
    closed: Arc<AtomicBool>,
}

impl ToolSet {
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(ToolDefinition::schema).collect()
    }

    /// True once teardown has started; tools must not be invoked anymore.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<McpCallResult> {
        if self.is_closed() {
            return Err(McpError::Disconnected);
        }
        let tool = self
            .get(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;
        tool.invoke(arguments).await
    }
}

struct TeardownState {
    completed: Arc<AtomicBool>,
    sessions: Mutex<Vec<ToolSession>>,
    listener_done: CancellationToken,
}

impl Drop for TeardownState {
    fn drop(&mut self) {
        self.listener_done.cancel();
        let sessions = std::mem::take(self.sessions.get_mut());
        if sessions.is_empty() || self.completed.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!(
            "Tool session dropped without teardown, closing {} MCP connections",
            sessions.len()
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_sessions(sessions));
            }
            Err(_) => warn!("No runtime available, MCP connections dropped without close"),
        }
    }
}

/// Cloneable handle to the idempotent teardown of one aggregate session.
#[derive(Clone)]
pub struct TeardownHandle {
    state: Arc<TeardownState>,
}

impl TeardownHandle {
    fn new(sessions: Vec<ToolSession>, completed: Arc<AtomicBool>) -> Self {
        Self {
            state: Arc::new(TeardownState {
                completed,
                sessions: Mutex::new(sessions),
                listener_done: CancellationToken::new(),
            }),
        }
    }

    /// Close every connection. Only the first call does anything.
    pub async fn run(&self) {
        if self.state.completed.swap(true, Ordering::SeqCst) {
            debug!("Tool session teardown already ran");
            return;
        }

        self.state.listener_done.cancel();
        let sessions = std::mem::take(&mut *self.state.sessions.lock());
        close_sessions(sessions).await;
    }

    pub fn is_completed(&self) -> bool {
        self.state.completed.load(Ordering::SeqCst)
    }

    /// Run teardown when `cancel` fires, unless teardown already happened.
    fn listen(&self, cancel: CancellationToken) {
        let state: Weak<TeardownState> = Arc::downgrade(&self.state);
        let done = self.state.listener_done.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = done.cancelled() => {}
                _ = cancel.cancelled() => {
                    if let Some(state) = state.upgrade() {
                        info!("Request cancelled, tearing down MCP connections");
                        TeardownHandle { state }.run().await;
                    }
                }
            }
        });
    }
}

impl fmt::Debug for TeardownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownHandle")
            .field("completed", &self.is_completed())
            .finish()
    }
}

async fn close_sessions(sessions: Vec<ToolSession>) {
    if sessions.is_empty() {
        return;
    }

    let closes = sessions.iter().map(|session| async move {
        match session.connection.close().await {
            Ok(()) => debug!("Closed MCP connection to {}", session.source_url),
            Err(e) => warn!(
                "Failed to close MCP connection to {}: {}",
                session.source_url, e
            ),
        }
    });
    join_all(closes).await;
    info!("Closed {} MCP connections", sessions.len());
}

/// Everything one chat request uses from its MCP servers.
#[derive(Debug)]
pub struct AggregateToolSession {
    tools: Arc<ToolSet>,
    tool_origins: BTreeMap<String, Vec<String>>,
    skipped: Vec<SkippedServer>,
    teardown: TeardownHandle,
}

impl AggregateToolSession {
    /// Merge the sessions' manifests in input order; a later session's tool
    /// replaces an earlier one with the same name.
    ///
    /// With a `cancel` token and at least one session, a listener task is
    /// spawned, so this must run inside a tokio runtime.
    pub fn assemble(sessions: Vec<ToolSession>, cancel: Option<CancellationToken>) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let mut tools = BTreeMap::new();
        let mut tool_origins: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for session in &sessions {
            let origin = tool_origins.entry(session.source_url.clone()).or_default();
            for tool in &session.tools {
                origin.push(tool.name.clone());
                let definition = ToolDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.parameters.clone(),
                    source_url: session.source_url.clone(),
                    connection: session.connection.clone(),
                };
                if let Some(previous) = tools.insert(tool.name.clone(), definition) {
                    debug!(
                        "Tool '{}' from {} replaced by {}",
                        tool.name, previous.source_url, session.source_url
                    );
                }
            }
        }

        let has_sessions = !sessions.is_empty();
        let teardown = TeardownHandle::new(sessions, closed.clone());
        if let (true, Some(cancel)) = (has_sessions, cancel) {
            teardown.listen(cancel);
        }

        Self {
            tools: Arc::new(ToolSet { tools, closed }),
            tool_origins,
            skipped: Vec::new(),
            teardown,
        }
    }

    /// No MCP servers configured.
    pub fn empty() -> Self {
        Self::assemble(Vec::new(), None)
    }

    pub fn with_skipped(mut self, skipped: Vec<SkippedServer>) -> Self {
        self.skipped = skipped;
        self
    }

    /// The tool set for the generation step, or `None` when there are no
    /// tools so the caller leaves the tools parameter out entirely.
    pub fn tools_for_generation(&self) -> Option<Arc<ToolSet>> {
        if self.tools.is_empty() {
            None
        } else {
            Some(self.tools.clone())
        }
    }

    /// Server url to the names of the tools it advertised.
    pub fn tool_origins(&self) -> &BTreeMap<String, Vec<String>> {
        &self.tool_origins
    }

    pub fn skipped(&self) -> &[SkippedServer] {
        &self.skipped
    }

    pub fn cleanup(&self) -> TeardownHandle {
        self.teardown.clone()
    }

    pub async fn teardown(&self) {
        self.teardown.run().await;
    }

    /// Split into the `{ tools, cleanup }` pair handed to chat handlers.
    pub fn into_parts(self) -> (Option<Arc<ToolSet>>, TeardownHandle) {
        (self.tools_for_generation(), self.teardown)
    }
}
