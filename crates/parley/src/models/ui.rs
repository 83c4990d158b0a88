//! Messages as the chat interface sends them (`useChat` UI messages)
use super::role::Role;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<UiPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl UiMessage {
    pub fn new<S: Into<String>>(id: S, role: Role, parts: Vec<UiPart>) -> Self {
        Self {
            id: id.into(),
            role,
            parts,
            metadata: None,
        }
    }

    /// Text parts joined together, ignoring everything else
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                UiPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolInvocationState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    /// Sent as `dynamic-tool` with the name in `toolName` rather than in the tag
    pub dynamic: bool,
    pub tool_call_id: String,
    pub state: ToolInvocationState,
    pub input: Value,
    pub output: Option<Value>,
    pub error_text: Option<String>,
}

/// One fragment of a UI message. The wire format tags parts with a `type`
/// string; tool and data parts carry their name inside that tag
/// (`tool-readFile`, `data-suggestions`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum UiPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    File {
        url: String,
        media_type: String,
        filename: Option<String>,
    },
    StepStart,
    Data {
        name: String,
        id: Option<String>,
        data: Value,
    },
    Tool(ToolInvocation),
    /// A part type we do not know about, kept so the normalizer can reject it
    Other {
        kind: String,
        payload: Value,
    },
}

impl UiPart {
    pub fn text<S: Into<String>>(text: S) -> Self {
        UiPart::Text { text: text.into() }
    }

    pub fn file<U: Into<String>, M: Into<String>>(url: U, media_type: M) -> Self {
        UiPart::File {
            url: url.into(),
            media_type: media_type.into(),
            filename: None,
        }
    }

    /// The `type` tag this part has on the wire
    pub fn kind(&self) -> String {
        match self {
            UiPart::Text { .. } => "text".to_string(),
            UiPart::Reasoning { .. } => "reasoning".to_string(),
            UiPart::File { .. } => "file".to_string(),
            UiPart::StepStart => "step-start".to_string(),
            UiPart::Data { name, .. } => format!("data-{}", name),
            UiPart::Tool(invocation) if invocation.dynamic => "dynamic-tool".to_string(),
            UiPart::Tool(invocation) => format!("tool-{}", invocation.tool_name),
            UiPart::Other { kind, .. } => kind.clone(),
        }
    }
}

fn required_str(object: &Map<String, Value>, field: &str, kind: &str) -> Result<String, String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| format!("part '{}' is missing string field '{}'", kind, field))
}

fn optional_str(object: &Map<String, Value>, field: &str) -> Option<String> {
    object.get(field).and_then(Value::as_str).map(String::from)
}

fn tool_invocation(
    object: &Map<String, Value>,
    tool_name: String,
    dynamic: bool,
    kind: &str,
) -> Result<ToolInvocation, String> {
    let state = object
        .get("state")
        .cloned()
        .ok_or_else(|| format!("part '{}' is missing 'state'", kind))?;
    let state: ToolInvocationState = serde_json::from_value(state)
        .map_err(|e| format!("part '{}' has an invalid state: {}", kind, e))?;

    Ok(ToolInvocation {
        tool_name,
        dynamic,
        tool_call_id: required_str(object, "toolCallId", kind)?,
        state,
        input: object.get("input").cloned().unwrap_or(Value::Null),
        output: object.get("output").cloned(),
        error_text: optional_str(object, "errorText"),
    })
}

impl TryFrom<Value> for UiPart {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let object = value
            .as_object()
            .ok_or_else(|| "message part must be an object".to_string())?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "message part is missing 'type'".to_string())?
            .to_string();

        let part = match kind.as_str() {
            "text" => UiPart::Text {
                text: required_str(object, "text", &kind)?,
            },
            "reasoning" => UiPart::Reasoning {
                text: required_str(object, "text", &kind)?,
            },
            "file" => UiPart::File {
                url: required_str(object, "url", &kind)?,
                media_type: required_str(object, "mediaType", &kind)?,
                filename: optional_str(object, "filename"),
            },
            "step-start" => UiPart::StepStart,
            "dynamic-tool" => {
                let tool_name = required_str(object, "toolName", &kind)?;
                UiPart::Tool(tool_invocation(object, tool_name, true, &kind)?)
            }
            _ => {
                if let Some(name) = kind.strip_prefix("data-") {
                    UiPart::Data {
                        name: name.to_string(),
                        id: optional_str(object, "id"),
                        data: object.get("data").cloned().unwrap_or(Value::Null),
                    }
                } else if let Some(name) = kind.strip_prefix("tool-") {
                    UiPart::Tool(tool_invocation(object, name.to_string(), false, &kind)?)
                } else {
                    UiPart::Other {
                        kind: kind.clone(),
                        payload: value.clone(),
                    }
                }
            }
        };
        Ok(part)
    }
}

impl From<UiPart> for Value {
    fn from(part: UiPart) -> Self {
        let kind = part.kind();
        match part {
            UiPart::Text { text } | UiPart::Reasoning { text } => json!({
                "type": kind,
                "text": text,
            }),
            UiPart::File {
                url,
                media_type,
                filename,
            } => {
                let mut value = json!({
                    "type": kind,
                    "url": url,
                    "mediaType": media_type,
                });
                if let Some(filename) = filename {
                    value["filename"] = json!(filename);
                }
                value
            }
            UiPart::StepStart => json!({ "type": kind }),
            UiPart::Data { id, data, .. } => {
                let mut value = json!({ "type": kind, "data": data });
                if let Some(id) = id {
                    value["id"] = json!(id);
                }
                value
            }
            UiPart::Tool(invocation) => {
                let mut value = json!({
                    "type": kind,
                    "toolCallId": invocation.tool_call_id,
                    "state": invocation.state,
                    "input": invocation.input,
                });
                if invocation.dynamic {
                    value["toolName"] = json!(invocation.tool_name);
                }
                if let Some(output) = invocation.output {
                    value["output"] = output;
                }
                if let Some(error_text) = invocation.error_text {
                    value["errorText"] = json!(error_text);
                }
                value
            }
            UiPart::Other { payload, .. } => payload,
        }
    }
}
