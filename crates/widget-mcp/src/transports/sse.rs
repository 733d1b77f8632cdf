use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{BrokerConfig, McpServerDescriptor};
use crate::error::{McpError, Result};
use crate::protocol::client::McpTransport;

/// MCP over server-sent events.
///
/// A long-lived GET carries server messages. The server announces the URL for
/// client messages in an `endpoint` event; every outgoing message is POSTed
/// there.
pub struct SseTransport {
    url: Url,
    client: Client,
    headers: HeaderMap,
    connect_timeout: Duration,
    request_timeout: Duration,
    connected: AtomicBool,
    message_tx: parking_lot::Mutex<Option<mpsc::Sender<String>>>,
    message_rx: Mutex<mpsc::Receiver<String>>,
    endpoint_tx: Arc<watch::Sender<Option<Url>>>,
    sse_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    pub fn new(descriptor: &McpServerDescriptor, config: &BrokerConfig) -> Result<Self> {
        let url = Url::parse(&descriptor.url).map_err(|e| {
            McpError::InvalidConfig(format!("Invalid url {}: {}", descriptor.url, e))
        })?;
        let headers = build_headers(descriptor)?;
        let (message_tx, message_rx) = mpsc::channel(100);
        let (endpoint_tx, _) = watch::channel(None);

        Ok(Self {
            url,
            client: Client::new(),
            headers,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            connected: AtomicBool::new(false),
            message_tx: parking_lot::Mutex::new(Some(message_tx)),
            message_rx: Mutex::new(message_rx),
            endpoint_tx: Arc::new(endpoint_tx),
            sse_handle: parking_lot::Mutex::new(None),
        })
    }

    async fn post_endpoint(&self) -> Result<Url> {
        let mut rx = self.endpoint_tx.subscribe();
        let endpoint = tokio::time::timeout(self.connect_timeout, rx.wait_for(Option::is_some))
            .await
            .map_err(|_| {
                McpError::Timeout(format!("No endpoint announced by {}", self.url))
            })?
            .map_err(|_| McpError::Disconnected)?;

        endpoint.clone().ok_or(McpError::Disconnected)
    }
}

pub(crate) fn build_headers(descriptor: &McpServerDescriptor) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &descriptor.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| McpError::InvalidConfig(format!("Invalid header name {}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            McpError::InvalidConfig(format!("Invalid header value for {}: {}", name, e))
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn connect(&self) -> Result<()> {
        info!("Connecting to MCP SSE endpoint: {}", self.url);

        let Some(message_tx) = self.message_tx.lock().take() else {
            return Err(McpError::Connection(format!(
                "SSE transport for {} was already used",
                self.url
            )));
        };

        // Only the handshake is bounded; the stream itself stays open.
        let request = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send();
        let response = tokio::time::timeout(self.connect_timeout, request)
            .await
            .map_err(|_| {
                McpError::Timeout(format!(
                    "Connecting to {} timed out after {}ms",
                    self.url,
                    self.connect_timeout.as_millis()
                ))
            })??;

        if !response.status().is_success() {
            return Err(McpError::Connection(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let base = self.url.clone();
        let endpoint_tx = self.endpoint_tx.clone();

        let handle = tokio::spawn(async move {
            let mut stream = response.bytes_stream().eventsource();
            while let Some(event) = stream.next().await {
                match event {
                    Ok(event) => match event.event.as_str() {
                        "endpoint" => match base.join(event.data.trim()) {
                            Ok(endpoint) => {
                                debug!("Got endpoint: {}", endpoint);
                                endpoint_tx.send_replace(Some(endpoint));
                            }
                            Err(e) => warn!("Bad endpoint '{}' from {}: {}", event.data, base, e),
                        },
                        "message" | "" => {
                            if message_tx.send(event.data).await.is_err() {
                                break;
                            }
                        }
                        other => debug!("Ignoring SSE event '{}'", other),
                    },
                    Err(e) => {
                        warn!("SSE stream error: {}", e);
                        break;
                    }
                }
            }
            debug!("SSE stream ended for {}", base);
        });

        *self.sse_handle.lock() = Some(handle);
        self.connected.store(true, Ordering::SeqCst);

        info!("MCP SSE transport connected: {}", self.url);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Disconnecting MCP SSE transport: {}", self.url);

        if let Some(handle) = self.sse_handle.lock().take() {
            handle.abort();
        }

        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }

        let post_url = self.post_endpoint().await?;

        let response = self
            .client
            .post(post_url.clone())
            .headers(self.headers.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(message)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!(
                "POST failed: {} - {}",
                status, body
            )));
        }

        debug!("Sent message via POST to {}", post_url);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>> {
        let mut rx = self.message_rx.lock().await;
        Ok(rx.recv().await)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.sse_handle.lock().take() {
            handle.abort();
        }
    }
}
