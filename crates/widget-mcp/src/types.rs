use serde::{Deserialize, Serialize};

/// A tool as advertised in a server's manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Result of calling an MCP tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpCallResult {
    #[serde(default)]
    pub content: Vec<McpContentItem>,
    #[serde(default)]
    pub is_error: bool,
}

impl McpCallResult {
    /// Render the content items as plain text for the model.
    pub fn to_text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                McpContentItem::Text { text } => text.clone(),
                McpContentItem::Image { data, mime_type } => {
                    format!("[Image: {} ({} bytes)]", mime_type, data.len())
                }
                McpContentItem::Resource { resource } => match &resource.text {
                    Some(text) => format!("[Resource {}]: {}", resource.uri, text),
                    None => format!("[Resource {}]", resource.uri),
                },
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum McpContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "resource")]
    Resource { resource: McpResource },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResource {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_text_joins_content_items() {
        let result = McpCallResult {
            content: vec![
                McpContentItem::Text {
                    text: "first".to_string(),
                },
                McpContentItem::Image {
                    data: "abcd".to_string(),
                    mime_type: "image/png".to_string(),
                },
                McpContentItem::Resource {
                    resource: McpResource {
                        uri: "file:///a.txt".to_string(),
                        mime_type: None,
                        text: Some("body".to_string()),
                        blob: None,
                    },
                },
            ],
            is_error: false,
        };

        assert_eq!(
            result.to_text(),
            "first\n[Image: image/png (4 bytes)]\n[Resource file:///a.txt]: body"
        );
    }
}
