//! Tool-server registry: turns the loosely shaped server lists found in widget
//! configuration and chat payloads into canonical [`McpServerDescriptor`]s.
//!
//! Normalization is pure and deterministic. Invalid entries are skipped with a
//! warning so one bad entry never blocks the rest of the batch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Transport kind as requested by the widget configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Sse,
    Http,
}

impl TransportKind {
    fn parse(raw: Option<&str>, url: &str) -> Self {
        match raw.map(|kind| kind.trim().to_ascii_lowercase()) {
            None => TransportKind::Sse,
            Some(kind) if kind.is_empty() || kind == "sse" => TransportKind::Sse,
            Some(kind) if kind == "http" => TransportKind::Http,
            Some(other) => {
                warn!(
                    "Unknown MCP transport type '{}' for {}, using sse",
                    other, url
                );
                TransportKind::Sse
            }
        }
    }
}

/// Wire transport the broker actually dials.
///
/// `http` requests are carried over SSE as well. Real streamable-HTTP support
/// needs a new variant here and a matching arm in the broker's connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireTransport {
    Sse,
}

impl From<TransportKind> for WireTransport {
    fn from(_kind: TransportKind) -> Self {
        WireTransport::Sse
    }
}

/// One MCP server entry exactly as it arrives from configuration or a request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
}

impl RawServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_headers(mut self, headers: Value) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// The two header shapes accepted at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RawHeaders {
    /// `[{ "key": "Authorization", "value": "Bearer ..." }, ...]`
    PairList(Vec<Value>),
    /// `{ "Authorization": "Bearer ..." }`
    Mapping(Map<String, Value>),
}

impl RawHeaders {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(RawHeaders::PairList(items)),
            Value::Object(map) => Some(RawHeaders::Mapping(map)),
            _ => None,
        }
    }

    /// Fold into a header map. Later duplicates win.
    pub fn into_header_map(self, url: &str) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();

        match self {
            RawHeaders::PairList(items) => {
                for item in items {
                    match pair_from_value(&item) {
                        Some((key, value)) => {
                            headers.insert(key, value);
                        }
                        None => warn!("Skipping malformed header entry for {}: {}", url, item),
                    }
                }
            }
            RawHeaders::Mapping(map) => {
                for (key, value) in map {
                    match scalar_to_string(&value) {
                        Some(value) if !key.trim().is_empty() => {
                            headers.insert(key, value);
                        }
                        _ => warn!("Skipping header '{}' for {}: unsupported value", key, url),
                    }
                }
            }
        }

        headers
    }
}

fn pair_from_value(item: &Value) -> Option<(String, String)> {
    let object = item.as_object()?;
    let key = object
        .get("key")
        .or_else(|| object.get("name"))
        .and_then(Value::as_str)?
        .trim();
    if key.is_empty() {
        return None;
    }

    let value = match object.get("value") {
        None | Some(Value::Null) => String::new(),
        Some(value) => scalar_to_string(value)?,
    };

    Some((key.to_string(), value))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Canonical, connection-ready description of one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct McpServerDescriptor {
    pub url: String,
    pub transport: WireTransport,
    /// What the configuration asked for, kept for display and diagnostics.
    pub requested_transport: TransportKind,
    pub headers: BTreeMap<String, String>,
}

impl McpServerDescriptor {
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transport: WireTransport::Sse,
            requested_transport: TransportKind::Sse,
            headers: BTreeMap::new(),
        }
    }
}

/// Normalize raw server entries, dropping the invalid ones.
pub fn normalize(raw_servers: &[RawServerConfig]) -> Vec<McpServerDescriptor> {
    raw_servers
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| normalize_one(index, raw))
        .collect()
}

/// Same as [`normalize`] for untyped JSON entries; entries that are not
/// server-shaped objects are skipped.
pub fn normalize_values(raw_servers: &[Value]) -> Vec<McpServerDescriptor> {
    let parsed: Vec<RawServerConfig> = raw_servers
        .iter()
        .enumerate()
        .filter_map(
            |(index, value)| match serde_json::from_value::<RawServerConfig>(value.clone()) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!("Skipping MCP server entry #{}: {}", index, e);
                    None
                }
            },
        )
        .collect();

    normalize(&parsed)
}

fn normalize_one(index: usize, raw: &RawServerConfig) -> Option<McpServerDescriptor> {
    let url = match raw.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => {
            warn!(
                "Skipping MCP server entry #{}{}: missing url",
                index,
                raw.name
                    .as_deref()
                    .map(|name| format!(" ('{}')", name))
                    .unwrap_or_default()
            );
            return None;
        }
    };

    let requested_transport = TransportKind::parse(raw.kind.as_deref(), &url);

    let headers = match raw.headers.clone() {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(value) => match RawHeaders::from_value(value) {
            Some(headers) => headers.into_header_map(&url),
            None => {
                warn!("Ignoring headers for {}: expected a list or an object", url);
                BTreeMap::new()
            }
        },
    };

    Some(McpServerDescriptor {
        url,
        transport: requested_transport.into(),
        requested_transport,
        headers,
    })
}

/// Timeouts and options for connecting to MCP servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Bound on the SSE handshake and on waiting for the endpoint announcement.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Bound on each JSON-RPC request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Bound on connect plus manifest retrieval for one server.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,
    /// GET attempts before connecting. Zero disables the probe.
    #[serde(default)]
    pub readiness_probe_attempts: u32,
    #[serde(default = "default_probe_interval")]
    pub readiness_probe_interval_ms: u64,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

fn default_connect_timeout() -> u64 {
    10000 // 10 seconds
}

fn default_request_timeout() -> u64 {
    60000 // 60 seconds
}

fn default_startup_timeout() -> u64 {
    15000 // 15 seconds
}

fn default_probe_interval() -> u64 {
    6000
}

fn default_client_name() -> String {
    "mcp-widget-server".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            startup_timeout_ms: default_startup_timeout(),
            readiness_probe_attempts: 0,
            readiness_probe_interval_ms: default_probe_interval(),
            client_name: default_client_name(),
        }
    }
}
