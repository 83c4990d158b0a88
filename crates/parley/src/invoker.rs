//! Calling the model: blocking or streaming, with an optional tool loop and
//! an optional structured-output schema
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::dispatcher::ToolDispatcher;
use crate::errors::{ChatError, ChatResult};
use crate::models::message::{Message, MessageContent, ToolRequest, ToolResponse};
use crate::partial_json::parse_partial;
use crate::providers::base::{CompletionRequest, FinishReason, Provider, ProviderEvent, Usage};
use crate::schema;

/// Per-call settings for [`ModelInvoker`]
#[derive(Clone, Default)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub system: String,
    /// JSON Schema the final answer must satisfy
    pub schema: Option<Value>,
    pub dispatcher: Option<ToolDispatcher>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl GenerateOptions {
    pub fn new<S: Into<String>>(system: S) -> Self {
        Self {
            system: system.into(),
            ..Default::default()
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_tools(mut self, dispatcher: ToolDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn max_steps(&self) -> usize {
        self.dispatcher.as_ref().map_or(1, ToolDispatcher::max_steps)
    }

    fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            system: self.system.clone(),
            messages,
            tools: self
                .dispatcher
                .as_ref()
                .map(|dispatcher| dispatcher.tools().to_vec())
                .unwrap_or_default(),
            response_schema: self.schema.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// The outcome of a full generation, across every tool step
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// The assistant message of the last step
    pub message: Message,
    /// Text of the last step
    pub text: String,
    /// Validated structured output, when a schema was requested
    pub output: Option<Value>,
    /// Assistant and tool messages produced during the turn, in order
    pub messages: Vec<Message>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub steps: usize,
}

impl Generation {
    /// The step limit cut the turn short while the model still wanted tools
    pub fn truncated(&self) -> bool {
        self.finish_reason == FinishReason::StepLimit
    }

    /// The annotation carried by a truncated generation
    pub fn truncation(&self) -> Option<ChatError> {
        self.truncated()
            .then_some(ChatError::StepLimitExceeded(self.steps))
    }
}

/// Incremental results of [`ModelInvoker::stream`]
#[derive(Debug, Clone, PartialEq)]
pub enum Increment {
    TextDelta(String),
    /// The structured output parsed so far; grows monotonically
    PartialOutput(Value),
    ToolCall(ToolRequest),
    ToolResult(ToolResponse),
    StepFinished {
        step: usize,
        finish_reason: FinishReason,
        usage: Usage,
    },
    Finished(Generation),
}

/// Shared handle on the process-wide provider client
#[derive(Clone)]
pub struct ModelInvoker {
    provider: Arc<dyn Provider>,
}

impl ModelInvoker {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Run the whole turn and return once the model is done
    pub async fn generate(
        &self,
        messages: Vec<Message>,
        options: &GenerateOptions,
    ) -> ChatResult<Generation> {
        let mut turn = Turn::new(messages);
        let max_steps = options.max_steps();

        for step in 1..=max_steps {
            let request = options.request(turn.conversation.clone());
            let (message, usage) = self.provider.complete(&request).await?;
            let finish = if message.has_tool_requests() {
                FinishReason::ToolCalls
            } else {
                FinishReason::Stop
            };
            debug!(step, ?finish, "model step finished");

            let responses = match (&options.dispatcher, message.has_tool_requests()) {
                (Some(dispatcher), true) => {
                    let requests: Vec<ToolRequest> =
                        message.tool_requests().into_iter().cloned().collect();
                    dispatcher.dispatch_all(&requests).await
                }
                _ => Vec::new(),
            };
            if turn.record(step, message, usage, finish, responses, max_steps) {
                break;
            }
        }

        turn.finish(options.schema.as_ref())
    }

    /// Generate and deserialize a structured output
    pub async fn generate_object<T: DeserializeOwned>(
        &self,
        messages: Vec<Message>,
        options: &GenerateOptions,
    ) -> ChatResult<T> {
        let generation = self.generate(messages, options).await?;
        let output = generation.output.ok_or_else(|| {
            ChatError::SchemaViolation("the model produced no structured output".to_string())
        })?;
        serde_json::from_value(output).map_err(|e| ChatError::SchemaViolation(e.to_string()))
    }

    /// Run the turn incrementally. The stream is lazy and ends with
    /// [`Increment::Finished`]; dropping it cancels the in-flight model call.
    pub fn stream(
        &self,
        messages: Vec<Message>,
        options: GenerateOptions,
    ) -> BoxStream<'static, ChatResult<Increment>> {
        Box::pin(stream_turn(self.provider.clone(), messages, options))
    }
}

/// Bookkeeping shared by the blocking and streaming loops
struct Turn {
    conversation: Vec<Message>,
    responses: Vec<Message>,
    last: Option<Message>,
    usage: Usage,
    finish_reason: FinishReason,
    steps: usize,
}

impl Turn {
    fn new(conversation: Vec<Message>) -> Self {
        Self {
            conversation,
            responses: Vec::new(),
            last: None,
            usage: Usage::default(),
            finish_reason: FinishReason::Stop,
            steps: 0,
        }
    }

    /// Record one step; returns true when the loop should stop
    fn record(
        &mut self,
        step: usize,
        message: Message,
        usage: Usage,
        finish: FinishReason,
        tool_responses: Vec<ToolResponse>,
        max_steps: usize,
    ) -> bool {
        self.steps = step;
        self.usage = self.usage.add(&usage);
        self.finish_reason = finish;
        self.conversation.push(message.clone());
        self.responses.push(message.clone());
        self.last = Some(message);

        if tool_responses.is_empty() {
            return true;
        }
        let mut tool_message = Message::tool();
        for response in tool_responses {
            tool_message = tool_message.with_content(MessageContent::ToolResponse(response));
        }
        self.conversation.push(tool_message.clone());
        self.responses.push(tool_message);

        if step >= max_steps {
            debug!(steps = step, "step limit reached with tool calls pending");
            self.finish_reason = FinishReason::StepLimit;
            return true;
        }
        false
    }

    fn finish(self, schema: Option<&Value>) -> ChatResult<Generation> {
        let message = self.last.unwrap_or_else(Message::assistant);
        let text = message.text();
        let output = match schema {
            Some(schema) if self.finish_reason != FinishReason::StepLimit && !text.is_empty() => {
                Some(parse_output(&text, schema)?)
            }
            _ => None,
        };
        Ok(Generation {
            message,
            text,
            output,
            messages: self.responses,
            usage: self.usage,
            finish_reason: self.finish_reason,
            steps: self.steps,
        })
    }
}

fn stream_turn(
    provider: Arc<dyn Provider>,
    messages: Vec<Message>,
    options: GenerateOptions,
) -> impl Stream<Item = ChatResult<Increment>> {
    async_stream::try_stream! {
        let mut turn = Turn::new(messages);
        let max_steps = options.max_steps();

        for step in 1..=max_steps {
            let request = options.request(turn.conversation.clone());
            let mut events = provider.stream(&request).await?;

            let mut text = String::new();
            let mut requests = Vec::new();
            let mut usage = Usage::default();
            let mut finish = FinishReason::Stop;
            let mut partial: Option<Value> = None;

            while let Some(event) = events.next().await {
                match event? {
                    ProviderEvent::TextDelta(delta) => {
                        text.push_str(&delta);
                        match &options.schema {
                            Some(schema) => {
                                if let Some(mut value) = parse_partial(strip_code_fence(&text)) {
                                    schema::prune_null_items(&mut value, schema);
                                    if partial.as_ref() != Some(&value) {
                                        partial = Some(value.clone());
                                        yield Increment::PartialOutput(value);
                                    }
                                }
                            }
                            None => yield Increment::TextDelta(delta),
                        }
                    }
                    ProviderEvent::ToolRequest(request) => {
                        yield Increment::ToolCall(request.clone());
                        requests.push(request);
                    }
                    ProviderEvent::Usage(step_usage) => usage = usage.add(&step_usage),
                    ProviderEvent::Finish(reason) => finish = reason,
                }
            }

            let mut message = Message::assistant();
            if !text.is_empty() {
                message = message.with_text(text);
            }
            for request in &requests {
                message = message.with_content(MessageContent::ToolRequest(request.clone()));
            }
            if !requests.is_empty() {
                finish = FinishReason::ToolCalls;
            }

            let responses = match &options.dispatcher {
                Some(dispatcher) if !requests.is_empty() => dispatcher.dispatch_all(&requests).await,
                _ => Vec::new(),
            };
            for response in &responses {
                yield Increment::ToolResult(response.clone());
            }

            let done = turn.record(step, message, usage.clone(), finish, responses, max_steps);
            debug!(step, finish = ?turn.finish_reason, "model step finished");
            yield Increment::StepFinished {
                step,
                finish_reason: turn.finish_reason,
                usage,
            };
            if done {
                break;
            }
        }

        let generation = turn.finish(options.schema.as_ref())?;
        yield Increment::Finished(generation);
    }
}

/// Drop a surrounding Markdown code fence, complete or still open
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        // still reading the language tag
        None => "",
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parse, clean and validate a final structured answer
pub fn parse_output(text: &str, schema: &Value) -> ChatResult<Value> {
    let mut value: Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| ChatError::SchemaViolation(format!("output is not JSON: {}", e)))?;
    schema::prune_null_items(&mut value, schema);
    schema::validate(&value, schema).map_err(ChatError::SchemaViolation)?;
    Ok(value)
}
