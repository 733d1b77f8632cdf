//! MCP tool aggregation for widget chat requests.
//!
//! Each chat request normalizes its server list, connects to every server in
//! parallel, merges the advertised tools into one namespace, and tears all
//! connections down exactly once when the request ends.

pub mod broker;
pub mod config;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod session;
pub mod transports;
pub mod types;

#[cfg(test)]
mod test_support;

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use broker::{
    ConnectOutcome, ConnectionBroker, McpConnection, McpConnector, SkipReason, SkippedServer,
    SseConnector, ToolSession,
};
pub use config::{
    normalize, normalize_values, BrokerConfig, McpServerDescriptor, RawHeaders, RawServerConfig,
    TransportKind, WireTransport,
};
pub use error::{McpError, Result};
pub use protocol::{McpProtocolClient, McpTransport};
pub use session::{AggregateToolSession, TeardownHandle, ToolDefinition, ToolSet};
pub use transports::SseTransport;
pub use types::*;

/// The `{ tools, cleanup }` pair a chat handler works with.
#[derive(Debug)]
pub struct McpClients {
    /// `None` when no server contributed a tool.
    pub tools: Option<Arc<ToolSet>>,
    pub cleanup: TeardownHandle,
    pub tool_origins: BTreeMap<String, Vec<String>>,
    pub skipped: Vec<SkippedServer>,
}

impl From<AggregateToolSession> for McpClients {
    fn from(session: AggregateToolSession) -> Self {
        let tool_origins = session.tool_origins().clone();
        let skipped = session.skipped().to_vec();
        let (tools, cleanup) = session.into_parts();
        Self {
            tools,
            cleanup,
            tool_origins,
            skipped,
        }
    }
}

/// Builds per-request aggregate sessions from raw server lists.
pub struct McpToolAggregator {
    broker: ConnectionBroker,
}

impl McpToolAggregator {
    pub fn new(broker: ConnectionBroker) -> Self {
        Self { broker }
    }

    pub fn sse(config: BrokerConfig) -> Self {
        Self::new(ConnectionBroker::sse(config))
    }

    pub async fn initialize(
        &self,
        raw_servers: &[RawServerConfig],
        cancel: Option<CancellationToken>,
    ) -> AggregateToolSession {
        let descriptors = normalize(raw_servers);
        self.initialize_descriptors(&descriptors, cancel).await
    }

    pub async fn initialize_descriptors(
        &self,
        descriptors: &[McpServerDescriptor],
        cancel: Option<CancellationToken>,
    ) -> AggregateToolSession {
        if descriptors.is_empty() {
            debug!("No MCP servers configured");
            return AggregateToolSession::empty();
        }

        let outcome = match &cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Request cancelled while connecting to MCP servers");
                    return AggregateToolSession::empty();
                }
                outcome = self.broker.connect_all(descriptors) => outcome,
            },
            None => self.broker.connect_all(descriptors).await,
        };
        AggregateToolSession::assemble(outcome.sessions, cancel).with_skipped(outcome.skipped)
    }
}

/// Connect to `raw_servers` over SSE with default settings.
///
/// When `cancel` is given, firing it tears the connections down without
/// waiting for the caller. The caller still runs `cleanup` on every exit path
/// it controls; extra runs are no-ops.
pub async fn initialize_mcp_clients(
    raw_servers: &[RawServerConfig],
    cancel: Option<CancellationToken>,
) -> McpClients {
    McpToolAggregator::sse(BrokerConfig::default())
        .initialize(raw_servers, cancel)
        .await
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeConnection, FakeConnector, Plan};
    use std::time::{Duration, Instant};

    fn aggregator(connector: FakeConnector) -> McpToolAggregator {
        McpToolAggregator::new(ConnectionBroker::new(Arc::new(connector), BrokerConfig::default()))
    }

    #[tokio::test]
    async fn cancelling_during_connect_stops_dialing() {
        let fast = Arc::new(FakeConnection::new("http://fast/sse", &["t"]));
        let connector = FakeConnector::default()
            .with("http://fast/sse", Plan::Ready(fast))
            .with("http://slow/sse", Plan::Hang);
        let aggregator = aggregator(connector);
        let descriptors = vec![
            McpServerDescriptor::sse("http://fast/sse"),
            McpServerDescriptor::sse("http://slow/sse"),
        ];

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let session = aggregator
            .initialize_descriptors(&descriptors, Some(cancel))
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(session.tools_for_generation().is_none());
        assert!(session.skipped().is_empty());
    }

    #[tokio::test]
    async fn already_cancelled_request_connects_nothing() {
        let ready = Arc::new(FakeConnection::new("http://a/sse", &["t"]));
        let connector = FakeConnector::default().with("http://a/sse", Plan::Ready(ready));
        let aggregator = aggregator(connector);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let session = aggregator
            .initialize_descriptors(&[McpServerDescriptor::sse("http://a/sse")], Some(cancel))
            .await;

        assert!(session.tools_for_generation().is_none());
    }
}
