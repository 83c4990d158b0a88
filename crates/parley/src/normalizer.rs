//! Conversion from UI messages to the provider-agnostic messages the invoker sends
use serde_json::Value;
use tracing::warn;

use crate::errors::{ChatError, ChatResult};
use crate::models::content::Content;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::ToolCall;
use crate::models::ui::{ToolInvocation, ToolInvocationState, UiMessage, UiPart};

/// Flatten UI messages into backend-ready messages, preserving order.
///
/// Completed tool invocations inside an assistant message are split into the
/// assistant's tool request followed by a tool message carrying the result, so
/// the backend sees the exchange the way it originally happened.
pub fn normalize(messages: &[UiMessage]) -> ChatResult<Vec<Message>> {
    let mut normalized = Vec::new();
    for message in messages {
        match message.role {
            Role::System => normalized.push(normalize_system(message)?),
            Role::User => {
                let converted = normalize_user(message)?;
                if !converted.is_empty() {
                    normalized.push(converted);
                }
            }
            Role::Assistant => normalized.extend(normalize_assistant(message)?),
            Role::Tool => {
                let converted = normalize_tool(message)?;
                if !converted.is_empty() {
                    normalized.push(converted);
                }
            }
        }
    }
    Ok(normalized)
}

fn normalize_system(message: &UiMessage) -> ChatResult<Message> {
    let mut converted = Message::system().with_id(&message.id);
    for part in &message.parts {
        match part {
            UiPart::Text { text } => converted = converted.with_text(text),
            other => return Err(ChatError::UnsupportedPartKind(other.kind())),
        }
    }
    Ok(converted)
}

fn normalize_user(message: &UiMessage) -> ChatResult<Message> {
    let mut converted = Message::user().with_id(&message.id);
    for part in &message.parts {
        match part {
            UiPart::Text { text } => converted = converted.with_text(text),
            UiPart::File {
                url,
                media_type,
                filename,
            } => converted = converted.with_content(file_content(url, media_type, filename)?),
            UiPart::Reasoning { .. } | UiPart::StepStart | UiPart::Data { .. } => {}
            other => return Err(ChatError::UnsupportedPartKind(other.kind())),
        }
    }
    Ok(converted)
}

/// Tool messages carry plain text or the results of earlier calls
fn normalize_tool(message: &UiMessage) -> ChatResult<Message> {
    let mut converted = Message::tool().with_id(&message.id);
    for part in &message.parts {
        match part {
            UiPart::Text { text } => converted = converted.with_text(text),
            UiPart::Tool(invocation) => match tool_result(invocation) {
                Some(result) => {
                    converted = converted.with_tool_response(&invocation.tool_call_id, result)
                }
                None => warn!(
                    tool = %invocation.tool_name,
                    id = %invocation.tool_call_id,
                    "skipping tool invocation without a result"
                ),
            },
            UiPart::Reasoning { .. } | UiPart::StepStart | UiPart::Data { .. } => {}
            other => return Err(ChatError::UnsupportedPartKind(other.kind())),
        }
    }
    Ok(converted)
}

fn normalize_assistant(message: &UiMessage) -> ChatResult<Vec<Message>> {
    let mut output = Vec::new();
    let mut current = Message::assistant().with_id(&message.id);

    for part in &message.parts {
        match part {
            UiPart::Text { text } => current = current.with_text(text),
            UiPart::File {
                url,
                media_type,
                filename,
            } => current = current.with_content(file_content(url, media_type, filename)?),
            UiPart::Tool(invocation) => {
                let Some(result) = tool_result(invocation) else {
                    warn!(
                        tool = %invocation.tool_name,
                        id = %invocation.tool_call_id,
                        "skipping tool invocation without a result"
                    );
                    continue;
                };

                current = current.with_tool_request(
                    &invocation.tool_call_id,
                    Ok(ToolCall::new(&invocation.tool_name, invocation.input.clone())),
                );
                output.push(current);
                output.push(
                    Message::tool()
                        .with_id(&message.id)
                        .with_tool_response(&invocation.tool_call_id, result),
                );
                current = Message::assistant().with_id(&message.id);
            }
            UiPart::Reasoning { .. } | UiPart::StepStart | UiPart::Data { .. } => {}
            UiPart::Other { kind, .. } => {
                return Err(ChatError::UnsupportedPartKind(kind.clone()))
            }
        }
    }

    if !current.is_empty() {
        output.push(current);
    }
    Ok(output)
}

fn file_content(
    url: &str,
    media_type: &str,
    filename: &Option<String>,
) -> ChatResult<MessageContent> {
    let parsed = url::Url::parse(url)
        .map_err(|e| ChatError::UnsupportedPartKind(format!("file with invalid url: {}", e)))?;
    match parsed.scheme() {
        "data" | "http" | "https" => {}
        scheme => {
            return Err(ChatError::UnsupportedPartKind(format!(
                "file with '{}' url",
                scheme
            )))
        }
    }

    let mut content = MessageContent::file(url, media_type);
    if let MessageContent::File(ref mut file) = content {
        file.filename = filename.clone();
    }
    Ok(content)
}

fn tool_result(invocation: &ToolInvocation) -> Option<ChatResult<Vec<Content>>> {
    match invocation.state {
        ToolInvocationState::OutputAvailable => {
            Some(Ok(output_to_contents(invocation.output.clone())))
        }
        ToolInvocationState::OutputError => Some(Err(ChatError::ToolExecution(
            invocation
                .error_text
                .clone()
                .unwrap_or_else(|| "tool failed".to_string()),
        ))),
        ToolInvocationState::InputStreaming | ToolInvocationState::InputAvailable => None,
    }
}

/// Tool outputs round-trip through the UI as arbitrary JSON
fn output_to_contents(output: Option<Value>) -> Vec<Content> {
    match output {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(text)) => vec![Content::text(text)],
        Some(value) => serde_json::from_value::<Vec<Content>>(value.clone())
            .unwrap_or_else(|_| vec![Content::text(value.to_string())]),
    }
}

/// Render the conversation as `role: text` lines for prompts that inline it
pub fn format_history(messages: &[UiMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role, message.text()))
        .collect::<Vec<_>>()
        .join("\n")
}
