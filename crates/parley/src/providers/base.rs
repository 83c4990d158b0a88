use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

use crate::models::message::{Message, MessageContent, ToolRequest};
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Sum usage across the steps of one generation
    pub fn add(&self, other: &Usage) -> Usage {
        fn sum(a: Option<i32>, b: Option<i32>) -> Option<i32> {
            match (a, b) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
            }
        }
        Usage::new(
            sum(self.input_tokens, other.input_tokens),
            sum(self.output_tokens, other.output_tokens),
            sum(self.total_tokens, other.total_tokens),
        )
    }
}

/// Why a generation (or one step of it) stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    StepLimit,
    Error,
}

/// Everything a provider needs for one model call
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Overrides the provider's configured model
    pub model: Option<String>,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    /// JSON Schema the response must follow
    pub response_schema: Option<Value>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl CompletionRequest {
    pub fn new<S: Into<String>>(system: S, messages: Vec<Message>) -> Self {
        Self {
            system: system.into(),
            messages,
            ..Default::default()
        }
    }
}

/// Increments produced by a streaming model call
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    TextDelta(String),
    /// A fully assembled tool request
    ToolRequest(ToolRequest),
    Usage(Usage),
    Finish(FinishReason),
}

pub type ProviderStream = BoxStream<'static, Result<ProviderEvent>>;

/// Base trait for AI providers (OpenAI-compatible endpoints, mocks)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message
    async fn complete(&self, request: &CompletionRequest) -> Result<(Message, Usage)>;

    /// Generate the next message incrementally. Providers without native
    /// streaming replay the completed message as a single burst.
    async fn stream(&self, request: &CompletionRequest) -> Result<ProviderStream> {
        let (message, usage) = self.complete(request).await?;
        let events = message_to_events(message, usage);
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

/// Express a completed message as the events a stream would have produced
pub fn message_to_events(message: Message, usage: Usage) -> Vec<ProviderEvent> {
    let mut events = Vec::new();
    let mut finish = FinishReason::Stop;
    for content in message.content {
        match content {
            MessageContent::Text(text) if !text.text.is_empty() => {
                events.push(ProviderEvent::TextDelta(text.text))
            }
            MessageContent::ToolRequest(request) => {
                finish = FinishReason::ToolCalls;
                events.push(ProviderEvent::ToolRequest(request));
            }
            _ => {}
        }
    }
    events.push(ProviderEvent::Usage(usage));
    events.push(ProviderEvent::Finish(finish));
    events
}
