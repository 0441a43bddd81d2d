//! Data model shared by the session layer, the runner and the report.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HarnessError;

/// A tool advertised by the server.
///
/// Names are unique within a catalog by server contract; the harness does not
/// enforce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name (unique identifier)
    pub name: String,
    /// Human-readable description, empty when the server omits it
    #[serde(default)]
    pub description: String,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Decode one entry of a `tools/list` result.
    pub fn from_value(value: &Value) -> Result<Self, HarnessError> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| HarnessError::protocol(format!("Tool entry without a name: {value}")))?;
        let description = match value.get("description") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => {
                return Err(HarnessError::protocol(format!(
                    "Tool '{name}' has a non-string description: {other}"
                )))
            },
        };
        Ok(Self::new(name, description))
    }
}

/// A single tool invocation.
///
/// Argument schemas are tool-specific, so arguments stay opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: Map::new(),
        }
    }

    /// Add one argument.
    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Build a request from a JSON object; `null` means no arguments.
    pub fn from_json(tool_name: impl Into<String>, arguments: Value) -> Result<Self, HarnessError> {
        let arguments = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(HarnessError::protocol(format!(
                    "Tool arguments must be a JSON object, got {other}"
                )))
            },
        };
        Ok(Self {
            tool_name: tool_name.into(),
            arguments,
        })
    }
}

/// One content item in a tool response.
///
/// Text and image blocks are decoded; every other kind is passed through
/// untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image data
        data: String,
        mime_type: String,
    },
    Other {
        /// Value of the block's `type` field
        kind: String,
        raw: Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Decode a content block from its wire form.
    pub fn from_value(value: Value) -> Result<Self, HarnessError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                HarnessError::protocol(format!("Content block without a type: {value}"))
            })?
            .to_string();

        match kind.as_str() {
            "text" => {
                let text = value.get("text").and_then(Value::as_str).ok_or_else(|| {
                    HarnessError::protocol("Text content block without a text field")
                })?;
                Ok(Self::text(text))
            },
            "image" => {
                let data = value.get("data").and_then(Value::as_str);
                let mime_type = value.get("mimeType").and_then(Value::as_str);
                match (data, mime_type) {
                    (Some(data), Some(mime_type)) => Ok(Self::Image {
                        data: data.to_string(),
                        mime_type: mime_type.to_string(),
                    }),
                    _ => Err(HarnessError::protocol(
                        "Image content block requires data and mimeType",
                    )),
                }
            },
            _ => Ok(Self::Other { kind, raw: value }),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Decoded result of a successful `tools/call`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolCallResponse {
    pub content_blocks: Vec<ContentBlock>,
    /// Set when the server executed the tool but flagged the result as a failure.
    pub is_error: bool,
}

impl ToolCallResponse {
    /// Decode a `tools/call` result object.
    pub fn from_value(value: Value) -> Result<Self, HarnessError> {
        let Value::Object(mut result) = value else {
            return Err(HarnessError::protocol(format!(
                "tools/call result is not an object: {value}"
            )));
        };

        let content_blocks = match result.remove("content") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(ContentBlock::from_value)
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(HarnessError::protocol(format!(
                    "tools/call content is not an array: {other}"
                )))
            },
        };

        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            content_blocks,
            is_error,
        })
    }

    /// Text of the first content block, if it is a text block.
    pub fn first_text(&self) -> Option<&str> {
        self.content_blocks.first().and_then(ContentBlock::as_text)
    }

    /// All text blocks joined with newlines.
    pub fn joined_text(&self) -> String {
        self.content_blocks
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Identity the server reported during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_without_description() {
        let tool = ToolDescriptor::from_value(&json!({"name": "echo", "inputSchema": {}})).unwrap();
        assert_eq!(tool, ToolDescriptor::new("echo", ""));
    }

    #[test]
    fn test_descriptor_requires_name() {
        let err = ToolDescriptor::from_value(&json!({"description": "nameless"})).unwrap_err();
        assert_eq!(err.category(), "protocol");
    }

    #[test]
    fn test_text_and_image_blocks() {
        let response = ToolCallResponse::from_value(json!({
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"}
            ]
        }))
        .unwrap();

        assert_eq!(response.first_text(), Some("hello"));
        assert!(!response.is_error);
        assert_eq!(
            response.content_blocks[1],
            ContentBlock::Image {
                data: "aGk=".to_string(),
                mime_type: "image/png".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_block_kind_passes_through() {
        let raw = json!({"type": "resource", "resource": {"uri": "file:///a", "text": "x"}});
        let block = ContentBlock::from_value(raw.clone()).unwrap();
        assert_eq!(
            block,
            ContentBlock::Other {
                kind: "resource".to_string(),
                raw
            }
        );
    }

    #[test]
    fn test_text_block_without_text_is_malformed() {
        let err = ToolCallResponse::from_value(json!({"content": [{"type": "text"}]})).unwrap_err();
        assert_eq!(err.category(), "protocol");
    }

    #[test]
    fn test_is_error_flag_and_joined_text() {
        let response = ToolCallResponse::from_value(json!({
            "content": [{"type": "text", "text": "first"}, {"type": "text", "text": "second"}],
            "isError": true
        }))
        .unwrap();
        assert!(response.is_error);
        assert_eq!(response.joined_text(), "first\nsecond");
    }

    #[test]
    fn test_request_from_json_rejects_non_object() {
        assert!(ToolCallRequest::from_json("echo", json!(["a"])).is_err());
        let empty = ToolCallRequest::from_json("echo", Value::Null).unwrap();
        assert!(empty.arguments.is_empty());
    }
}
