use super::content::{Content, TextContent};
use super::role::Role;
use super::tool::ToolCall;
use crate::errors::ChatResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub tool_call: ChatResult<ToolCall>,
}

impl ToolRequest {
    /// The requested tool name, if the model produced a well-formed call
    pub fn tool_name(&self) -> Option<&str> {
        self.tool_call.as_ref().ok().map(|call| call.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub tool_result: ChatResult<Vec<Content>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A file passed by reference: either a `data:` URL or a remote URL
pub struct FileContent {
    pub url: String,
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl FileContent {
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Content passed inside a message, which can be both simple content and tool content
pub enum MessageContent {
    Text(TextContent),
    File(FileContent),
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(TextContent { text: text.into() })
    }

    pub fn file<U: Into<String>, M: Into<String>>(url: U, media_type: M) -> Self {
        MessageContent::File(FileContent {
            url: url.into(),
            media_type: media_type.into(),
            filename: None,
        })
    }

    pub fn tool_request<S: Into<String>>(id: S, tool_call: ChatResult<ToolCall>) -> Self {
        MessageContent::ToolRequest(ToolRequest {
            id: id.into(),
            tool_call,
        })
    }

    pub fn tool_response<S: Into<String>>(id: S, tool_result: ChatResult<Vec<Content>>) -> Self {
        MessageContent::ToolResponse(ToolResponse {
            id: id.into(),
            tool_result,
        })
    }

    pub fn as_tool_request(&self) -> Option<&ToolRequest> {
        if let MessageContent::ToolRequest(ref tool_request) = self {
            Some(tool_request)
        } else {
            None
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResponse> {
        if let MessageContent::ToolResponse(ref tool_response) = self {
            Some(tool_response)
        } else {
            None
        }
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }
}

impl From<Content> for MessageContent {
    fn from(content: Content) -> Self {
        match content {
            Content::Text(text) => MessageContent::Text(text),
            Content::Image(image) => MessageContent::file(
                format!("data:{};base64,{}", image.mime_type, image.data),
                image.mime_type,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub id: String,
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
}

impl Message {
    /// Create an empty message for the given role with the current timestamp
    pub fn new(role: Role) -> Self {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    pub fn system() -> Self {
        Self::new(Role::System)
    }

    /// Create a message carrying tool results back to the model
    pub fn tool() -> Self {
        Self::new(Role::Tool)
    }

    /// Keep the id assigned by the interface
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = id.into();
        self
    }

    /// Add any MessageContent to the message
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    /// Add a file reference to the message
    pub fn with_file<U: Into<String>, M: Into<String>>(self, url: U, media_type: M) -> Self {
        self.with_content(MessageContent::file(url, media_type))
    }

    /// Add a tool request to the message
    pub fn with_tool_request<S: Into<String>>(
        self,
        id: S,
        tool_call: ChatResult<ToolCall>,
    ) -> Self {
        self.with_content(MessageContent::tool_request(id, tool_call))
    }

    /// Add a tool response to the message
    pub fn with_tool_response<S: Into<String>>(
        self,
        id: S,
        result: ChatResult<Vec<Content>>,
    ) -> Self {
        self.with_content(MessageContent::tool_response(id, result))
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Concatenation of every text fragment, in order
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(MessageContent::as_text)
            .collect::<String>()
    }

    pub fn tool_requests(&self) -> Vec<&ToolRequest> {
        self.content
            .iter()
            .filter_map(MessageContent::as_tool_request)
            .collect()
    }

    pub fn has_tool_requests(&self) -> bool {
        self.content
            .iter()
            .any(|content| content.as_tool_request().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ChatError;
    use serde_json::json;

    #[test]
    fn test_builder_keeps_order() {
        let message = Message::assistant()
            .with_text("Let me check. ")
            .with_tool_request("call_1", Ok(ToolCall::new("readFile", json!({"filePath": "a.md"}))))
            .with_text("Done.");

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.len(), 3);
        assert_eq!(message.text(), "Let me check. Done.");
        assert!(message.has_tool_requests());
        assert_eq!(message.tool_requests()[0].tool_name(), Some("readFile"));
    }

    #[test]
    fn test_failed_tool_request_has_no_name() {
        let message = Message::assistant().with_tool_request(
            "call_2",
            Err(ChatError::ToolNotFound("mystery".into())),
        );
        assert_eq!(message.tool_requests()[0].tool_name(), None);
    }

    #[test]
    fn test_image_content_becomes_data_url() {
        let content: MessageContent = Content::image("aGk=", "image/png").into();
        match content {
            MessageContent::File(file) => {
                assert_eq!(file.url, "data:image/png;base64,aGk=");
                assert!(file.is_image());
            }
            other => panic!("Expected file content, got {:?}", other),
        }
    }
}
