//! Read-only widget configuration loaded from a JSON or YAML file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use widget_mcp::{normalize_values, McpServerDescriptor};

#[derive(Error, Debug)]
pub enum WidgetStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON widget file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML widget file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Duplicate widget id: {0}")]
    DuplicateId(u64),
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_position() -> String {
    "bottom-right".to_string()
}

fn default_size() -> String {
    "md".to_string()
}

/// Accepts any JSON for an MCP server list. Entries stay untyped so a single
/// malformed one is skipped at normalization instead of failing the document;
/// `null` or a non-array value counts as no servers.
pub(crate) fn server_list<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(entries)) => Ok(entries),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => {
            warn!("Ignoring MCP server list that is not an array: {}", other);
            Ok(Vec::new())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_position")]
    pub position: String,
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default, deserialize_with = "server_list")]
    pub mcp_servers: Vec<Value>,
}

impl WidgetConfig {
    pub fn server_descriptors(&self) -> Vec<McpServerDescriptor> {
        normalize_values(&self.mcp_servers)
    }

    /// The widget as served to embedding pages: MCP server headers are
    /// dropped since they usually carry credentials.
    pub fn public_view(&self) -> Value {
        let mut view = json!({
            "id": self.id,
            "name": self.name,
            "defaultProvider": self.default_provider,
            "position": self.position,
            "size": self.size,
            "mcpServers": self
                .mcp_servers
                .iter()
                .map(|entry| match entry {
                    Value::Object(fields) => Value::Object(
                        fields
                            .iter()
                            .filter(|(key, _)| key.as_str() != "headers")
                            .map(|(key, value)| (key.clone(), value.clone()))
                            .collect(),
                    ),
                    other => other.clone(),
                })
                .collect::<Vec<_>>(),
        });
        if let Some(description) = &self.description {
            view["description"] = json!(description);
        }
        if let Some(prompt) = &self.system_prompt {
            view["systemPrompt"] = json!(prompt);
        }
        view
    }
}

#[derive(Debug, Clone, Default)]
pub struct WidgetStore {
    widgets: BTreeMap<u64, WidgetConfig>,
}

impl WidgetStore {
    pub fn from_widgets(widgets: Vec<WidgetConfig>) -> Result<Self, WidgetStoreError> {
        let mut map = BTreeMap::new();
        for widget in widgets {
            let id = widget.id;
            if map.insert(id, widget).is_some() {
                return Err(WidgetStoreError::DuplicateId(id));
            }
        }
        Ok(Self { widgets: map })
    }

    /// Load widgets from `path`. `.yaml`/`.yml` files are parsed as YAML,
    /// anything else as JSON. A missing file yields an empty store.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, WidgetStoreError> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            warn!("Widget file {:?} not found, starting with no widgets", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let widgets: Vec<WidgetConfig> = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };

        let store = Self::from_widgets(widgets)?;
        info!("Loaded {} widget(s) from {:?}", store.len(), path);
        Ok(store)
    }

    pub fn get(&self, id: u64) -> Option<&WidgetConfig> {
        self.widgets.get(&id)
    }

    pub fn list(&self) -> impl Iterator<Item = &WidgetConfig> {
        self.widgets.values()
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }
}
