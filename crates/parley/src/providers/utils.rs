use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use crate::errors::ChatError;
use crate::models::content::Content;
use crate::models::message::{FileContent, Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

/// Name sent in place of a tool call the model produced but we could not parse
const INVALID_TOOL_CALL_NAME: &str = "invalid_tool_call";

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Result<Vec<Value>> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });
        let mut parts: Vec<Value> = Vec::new();
        let mut has_file = false;
        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        parts.push(json!({"type": "text", "text": text.text}));
                    }
                }
                MessageContent::File(file) => {
                    has_file = true;
                    parts.push(convert_file(file)?);
                }
                MessageContent::ToolRequest(request) => {
                    let (name, arguments) = match &request.tool_call {
                        Ok(tool_call) => (
                            sanitize_function_name(&tool_call.name),
                            tool_call.arguments.to_string(),
                        ),
                        // The call still has to appear so the error response that
                        // follows has something to answer
                        Err(_) => (INVALID_TOOL_CALL_NAME.to_string(), "{}".to_string()),
                    };
                    let tool_calls = converted
                        .as_object_mut()
                        .map(|object| object.entry("tool_calls").or_insert(json!([])));
                    if let Some(Value::Array(tool_calls)) = tool_calls {
                        tool_calls.push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": arguments,
                            }
                        }));
                    }
                }
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(contents) => {
                        let mut tool_text = Vec::new();
                        let mut image_messages = Vec::new();
                        for content in contents {
                            match content {
                                Content::Text(text) => tool_text.push(text.text.clone()),
                                Content::Image(image) => {
                                    tool_text.push("This tool result included an image that is uploaded in the next message.".to_string());
                                    image_messages.push(json!({
                                        "role": "user",
                                        "content": [{
                                            "type": "image_url",
                                            "image_url": {
                                                "url": format!("data:{};base64,{}", image.mime_type, image.data)
                                            }
                                        }]
                                    }));
                                }
                            }
                        }
                        output.push(json!({
                            "role": "tool",
                            "content": tool_text.join("\n"),
                            "tool_call_id": response.id
                        }));
                        output.extend(image_messages);
                    }
                    Err(e) => {
                        // A tool result error is shown as output so the model can interpret the error message
                        output.push(json!({
                            "role": "tool",
                            "content": format!("The tool call returned the following error:\n{}", e),
                            "tool_call_id": response.id
                        }));
                    }
                },
            }
        }

        if !parts.is_empty() {
            if has_file || parts.len() > 1 {
                converted["content"] = Value::Array(parts);
            } else {
                converted["content"] = parts[0]["text"].clone();
            }
        }

        if message.role == Role::Tool {
            // free text on a tool message has no call id to answer, so it goes in as user text
            if converted.get("content").is_some() {
                converted["role"] = json!("user");
                output.push(converted);
            }
        } else if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    Ok(messages_spec)
}

/// Convert a file reference into an OpenAI content part. Images may be
/// linked by URL; other files must arrive inline as `data:` URLs.
pub fn convert_file(file: &FileContent) -> Result<Value> {
    if file.is_image() {
        return Ok(json!({
            "type": "image_url",
            "image_url": { "url": file.url }
        }));
    }
    if !file.url.starts_with("data:") {
        return Err(anyhow!(
            "{} file at {} must be sent inline as a data URL",
            file.media_type,
            file.url
        ));
    }
    let mut value = json!({
        "type": "file",
        "file": { "file_data": file.url }
    });
    if let Some(filename) = &file.filename {
        value["file"]["filename"] = json!(filename);
    }
    Ok(value)
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// The `response_format` that constrains a completion to a JSON Schema
pub fn response_format(schema: &Value) -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "response",
            "schema": schema,
        }
    })
}

/// Build a tool request from the raw id, name and argument string the API returns
pub fn parse_tool_call(id: &str, function_name: &str, arguments: &str) -> MessageContent {
    if !is_valid_function_name(function_name) {
        let error = ChatError::ToolNotFound(format!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            function_name
        ));
        return MessageContent::tool_request(id, Err(error));
    }

    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    match serde_json::from_str::<Value>(arguments) {
        Ok(params) => MessageContent::tool_request(id, Ok(ToolCall::new(function_name, params))),
        Err(e) => {
            let error = ChatError::invalid_input(
                function_name,
                format!("Could not interpret tool use parameters for id {}: {}", id, e),
            );
            MessageContent::tool_request(id, Err(error))
        }
    }
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: Value) -> Result<Message> {
    let original = response["choices"][0]["message"].clone();
    if original.is_null() {
        return Err(anyhow!("Response contained no message: {}", response));
    }
    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(|t| t.as_str()) {
        message = message.with_text(text);
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default();
            let function_name = tool_call["function"]["name"].as_str().unwrap_or_default();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();
            message = message.with_content(parse_tool_call(id, function_name, arguments));
        }
    }

    Ok(message)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn sanitize_function_name(name: &str) -> String {
    name.chars()
        .map(|c| if is_name_char(c) { c } else { '_' })
        .collect()
}

fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_name_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPENAI_TOOL_USE_RESPONSE: &str = r#"{
        "choices": [{
            "role": "assistant",
            "message": {
                "tool_calls": [{
                    "id": "1",
                    "function": {
                        "name": "writeFile",
                        "arguments": "{\"filePath\": \"todo.md\", \"content\": \"- milk\"}"
                    }
                }]
            }
        }],
        "usage": {
            "input_tokens": 10,
            "output_tokens": 25,
            "total_tokens": 35
        }
    }"#;

    #[test]
    fn test_messages_to_openai_spec() -> Result<()> {
        let message = Message::user().with_text("Hello");
        let spec = messages_to_openai_spec(&[message])?;

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "Hello");
        Ok(())
    }

    #[test]
    fn test_messages_with_files_use_content_parts() {
        let message = Message::user()
            .with_text("Could you describe this image?")
            .with_file("data:image/png;base64,aGk=", "image/png")
            .with_file("https://example.com/cat.jpg", "image/jpeg")
            .with_file("data:application/pdf;base64,JVBERi0=", "application/pdf");
        let spec = messages_to_openai_spec(&[message]).unwrap();

        let parts = spec[0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], json!({"type": "text", "text": "Could you describe this image?"}));
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,aGk=");
        assert_eq!(parts[2]["image_url"]["url"], "https://example.com/cat.jpg");
        assert_eq!(parts[3]["file"]["file_data"], "data:application/pdf;base64,JVBERi0=");
    }

    #[test]
    fn test_linked_document_is_rejected() {
        let message = Message::user()
            .with_text("Summarize this")
            .with_file("https://example.com/report.pdf", "application/pdf");
        let err = messages_to_openai_spec(&[message]).unwrap_err();
        assert!(err.to_string().contains("https://example.com/report.pdf"));
    }

    #[test]
    fn test_tool_message_text_is_sent_as_user_text() {
        let messages = vec![
            Message::user().with_text("What is six times seven?"),
            Message::tool().with_text("42"),
        ];
        let spec = messages_to_openai_spec(&messages).unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec[1], json!({"role": "user", "content": "42"}));
    }

    #[test]
    fn test_messages_to_openai_spec_tool_exchange() {
        let messages = vec![
            Message::system().with_text("Use the tools."),
            Message::user().with_text("Read notes"),
            Message::assistant().with_tool_request(
                "call_1",
                Ok(ToolCall::new("readFile", json!({"filePath": "notes.md"}))),
            ),
            Message::tool().with_tool_response("call_1", Ok(vec![Content::text("# Notes")])),
            Message::assistant().with_tool_request(
                "call_2",
                Err(ChatError::ToolNotFound("bad".into())),
            ),
            Message::tool().with_tool_response(
                "call_2",
                Err(ChatError::ToolNotFound("bad".into())),
            ),
        ];

        let spec = messages_to_openai_spec(&messages).unwrap();
        assert_eq!(spec.len(), 6);
        assert_eq!(spec[0]["role"], "system");
        assert_eq!(spec[2]["tool_calls"][0]["function"]["name"], "readFile");
        assert_eq!(
            spec[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"filePath":"notes.md"}"#
        );
        assert_eq!(spec[3], json!({"role": "tool", "content": "# Notes", "tool_call_id": "call_1"}));
        assert_eq!(spec[4]["tool_calls"][0]["function"]["name"], INVALID_TOOL_CALL_NAME);
        assert!(spec[5]["content"]
            .as_str()
            .unwrap()
            .starts_with("The tool call returned the following error:"));
    }

    #[test]
    fn test_tool_response_with_image_adds_user_message() {
        let messages = vec![Message::tool().with_tool_response(
            "call_1",
            Ok(vec![Content::text("see image"), Content::image("aGk=", "image/png")]),
        )];
        let spec = messages_to_openai_spec(&messages).unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "tool");
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(
            spec[1]["content"][0]["image_url"]["url"],
            "data:image/png;base64,aGk="
        );
    }

    #[test]
    fn test_tools_to_openai_spec() -> Result<()> {
        let tool = Tool::new(
            "test_tool",
            "A test tool",
            json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "description": "Test parameter"
                    }
                },
                "required": ["input"]
            }),
        );

        let spec = tools_to_openai_spec(&[tool])?;

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "test_tool");
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let tool = Tool::new("dup", "", json!({"type": "object"}));
        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(result.unwrap_err().to_string().contains("Duplicate tool name"));
    }

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("hello-world"), "hello-world");
        assert_eq!(sanitize_function_name("hello world"), "hello_world");
        assert_eq!(sanitize_function_name("hello@world"), "hello_world");
    }

    #[test]
    fn test_openai_response_to_message_text() -> Result<()> {
        let response = json!({
            "choices": [{
                "role": "assistant",
                "message": {
                    "content": "Hello from John Cena!"
                }
            }]
        });

        let message = openai_response_to_message(response)?;
        assert_eq!(message.content.len(), 1);
        assert_eq!(message.text(), "Hello from John Cena!");
        assert!(matches!(message.role, Role::Assistant));
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_valid_toolrequest() -> Result<()> {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        let message = openai_response_to_message(response)?;

        assert_eq!(message.content.len(), 1);
        let request = message.content[0].as_tool_request().unwrap();
        let tool_call = request.tool_call.as_ref().unwrap();
        assert_eq!(tool_call.name, "writeFile");
        assert_eq!(
            tool_call.arguments,
            json!({"filePath": "todo.md", "content": "- milk"})
        );
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_invalid_func_name() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        response["choices"][0]["message"]["tool_calls"][0]["function"]["name"] =
            json!("invalid fn");

        let message = openai_response_to_message(response)?;
        let request = message.content[0].as_tool_request().unwrap();
        assert!(matches!(request.tool_call, Err(ChatError::ToolNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_json_decode_error() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        response["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"] =
            json!("invalid json {");

        let message = openai_response_to_message(response)?;
        let request = message.content[0].as_tool_request().unwrap();
        assert!(matches!(
            request.tool_call,
            Err(ChatError::InvalidToolInput { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_empty_arguments_become_empty_object() {
        let content = parse_tool_call("call_1", "listDirectory", "");
        let request = content.as_tool_request().unwrap();
        assert_eq!(request.tool_call.as_ref().unwrap().arguments, json!({}));
    }
}
