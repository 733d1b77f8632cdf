//! Connection broker: opens one MCP session per descriptor, concurrently, and
//! keeps every per-server failure local to that server.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{BrokerConfig, McpServerDescriptor, WireTransport};
use crate::error::{McpError, Result};
use crate::protocol::{McpProtocolClient, McpTransport};
use crate::transports::sse::{build_headers, SseTransport};
use crate::types::{McpCallResult, McpTool};

/// An open, initialized session with one MCP server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpTool>>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpCallResult>;
    async fn close(&self) -> Result<()>;
}

/// Opens connections for descriptors.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self, descriptor: &McpServerDescriptor) -> Result<Arc<dyn McpConnection>>;

    /// Checked before connecting. Servers that fail it are skipped.
    async fn probe(&self, _descriptor: &McpServerDescriptor) -> Result<()> {
        Ok(())
    }
}

/// Protocol client bound to its request timeout.
pub struct ClientConnection {
    url: String,
    client: McpProtocolClient,
    request_timeout_ms: u64,
}

#[async_trait]
impl McpConnection for ClientConnection {
    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.client.list_tools(self.request_timeout_ms).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpCallResult> {
        debug!("Calling MCP tool '{}' on {}", name, self.url);
        self.client
            .call_tool(name, arguments, self.request_timeout_ms)
            .await
    }

    async fn close(&self) -> Result<()> {
        self.client.disconnect().await
    }
}

/// Production connector speaking MCP over SSE.
pub struct SseConnector {
    config: BrokerConfig,
    http: Client,
}

impl SseConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl McpConnector for SseConnector {
    async fn connect(&self, descriptor: &McpServerDescriptor) -> Result<Arc<dyn McpConnection>> {
        let transport: Arc<dyn McpTransport> = match descriptor.transport {
            WireTransport::Sse => Arc::new(SseTransport::new(descriptor, &self.config)?),
        };

        let client = McpProtocolClient::new(transport, self.config.client_name.clone());
        client.connect().await?;

        match client.initialize(self.config.request_timeout_ms).await {
            Ok(init) => info!(
                "MCP server {} initialized: {} v{}",
                descriptor.url, init.server_info.name, init.server_info.version
            ),
            Err(e) => {
                let _ = client.disconnect().await;
                return Err(e);
            }
        }

        Ok(Arc::new(ClientConnection {
            url: descriptor.url.clone(),
            client,
            request_timeout_ms: self.config.request_timeout_ms,
        }))
    }

    async fn probe(&self, descriptor: &McpServerDescriptor) -> Result<()> {
        let attempts = self.config.readiness_probe_attempts;
        if attempts == 0 {
            return Ok(());
        }

        let headers = build_headers(descriptor)?;
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        for attempt in 1..=attempts {
            let request = self.http.get(&descriptor.url).headers(headers.clone()).send();
            match tokio::time::timeout(connect_timeout, request).await {
                Ok(Ok(response)) if response.status().is_success() => return Ok(()),
                Ok(Ok(response)) => debug!(
                    "Readiness probe {}/{} for {}: HTTP {}",
                    attempt,
                    attempts,
                    descriptor.url,
                    response.status()
                ),
                Ok(Err(e)) => debug!(
                    "Readiness probe {}/{} for {} failed: {}",
                    attempt, attempts, descriptor.url, e
                ),
                Err(_) => debug!(
                    "Readiness probe {}/{} for {} timed out",
                    attempt, attempts, descriptor.url
                ),
            }

            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(
                    self.config.readiness_probe_interval_ms,
                ))
                .await;
            }
        }

        Err(McpError::Connection(format!(
            "{} not ready after {} attempts",
            descriptor.url, attempts
        )))
    }
}

/// One successfully connected, tool-bearing server.
pub struct ToolSession {
    pub source_url: String,
    pub tools: Vec<McpTool>,
    pub connection: Arc<dyn McpConnection>,
}

impl fmt::Debug for ToolSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSession")
            .field("source_url", &self.source_url)
            .field("tools", &self.tools.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotReady(String),
    ConnectFailed(String),
    ManifestFailed(String),
    TimedOut,
    NoTools,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotReady(e) => write!(f, "not ready: {}", e),
            SkipReason::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            SkipReason::ManifestFailed(e) => write!(f, "tool manifest failed: {}", e),
            SkipReason::TimedOut => write!(f, "timed out"),
            SkipReason::NoTools => write!(f, "no tools advertised"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedServer {
    pub url: String,
    pub reason: SkipReason,
}

/// Result of [`ConnectionBroker::connect_all`]. Both lists keep input order.
#[derive(Debug, Default)]
pub struct ConnectOutcome {
    pub sessions: Vec<ToolSession>,
    pub skipped: Vec<SkippedServer>,
}

pub struct ConnectionBroker {
    connector: Arc<dyn McpConnector>,
    config: BrokerConfig,
}

impl ConnectionBroker {
    pub fn new(connector: Arc<dyn McpConnector>, config: BrokerConfig) -> Self {
        Self { connector, config }
    }

    pub fn sse(config: BrokerConfig) -> Self {
        Self::new(Arc::new(SseConnector::new(config.clone())), config)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Connect to every descriptor concurrently.
    ///
    /// Never fails: servers that cannot be reached, time out, return a bad
    /// manifest or advertise no tools end up in `skipped`.
    pub async fn connect_all(&self, descriptors: &[McpServerDescriptor]) -> ConnectOutcome {
        let attempts = descriptors.iter().map(|descriptor| self.connect_one(descriptor));
        let results = join_all(attempts).await;

        let mut outcome = ConnectOutcome::default();
        for (descriptor, result) in descriptors.iter().zip(results) {
            match result {
                Ok(session) => outcome.sessions.push(session),
                Err(reason) => {
                    if reason == SkipReason::NoTools {
                        info!("MCP server {} advertised no tools, skipping", descriptor.url);
                    } else {
                        warn!("Skipping MCP server {}: {}", descriptor.url, reason);
                    }
                    outcome.skipped.push(SkippedServer {
                        url: descriptor.url.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            "Connected to {}/{} MCP servers",
            outcome.sessions.len(),
            descriptors.len()
        );
        outcome
    }

    async fn connect_one(
        &self,
        descriptor: &McpServerDescriptor,
    ) -> std::result::Result<ToolSession, SkipReason> {
        if let Err(e) = self.connector.probe(descriptor).await {
            return Err(SkipReason::NotReady(e.to_string()));
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.startup_timeout_ms);

        let connection =
            match tokio::time::timeout_at(deadline, self.connector.connect(descriptor)).await {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => return Err(SkipReason::ConnectFailed(e.to_string())),
                Err(_) => return Err(SkipReason::TimedOut),
            };

        let tools = match tokio::time::timeout_at(deadline, connection.list_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                close_quietly(connection.as_ref(), &descriptor.url).await;
                return Err(SkipReason::ManifestFailed(e.to_string()));
            }
            Err(_) => {
                close_quietly(connection.as_ref(), &descriptor.url).await;
                return Err(SkipReason::TimedOut);
            }
        };

        if tools.is_empty() {
            close_quietly(connection.as_ref(), &descriptor.url).await;
            return Err(SkipReason::NoTools);
        }

        debug!(
            "MCP server {} advertised {} tools",
            descriptor.url,
            tools.len()
        );

        Ok(ToolSession {
            source_url: descriptor.url.clone(),
            tools,
            connection,
        })
    }
}

async fn close_quietly(connection: &dyn McpConnection, url: &str) {
    if let Err(e) = connection.close().await {
        warn!("Failed to close MCP connection to {}: {}", url, e);
    }
}
