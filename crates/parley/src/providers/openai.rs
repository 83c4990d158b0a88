use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::base::{
    CompletionRequest, FinishReason, Provider, ProviderEvent, ProviderStream, Usage,
};
use super::configs::OpenAiProviderConfig;
use super::sse::sse_events;
use super::utils::{
    messages_to_openai_spec, openai_response_to_message, parse_tool_call, response_format,
    tools_to_openai_spec,
};
use crate::models::message::{Message, MessageContent, ToolRequest};

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Option<Usage> {
        let usage = data.get("usage").filter(|usage| usage.is_object())?;

        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let total_tokens = usage
            .get("total_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .or_else(|| match (input_tokens, output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });

        Some(Usage::new(input_tokens, output_tokens, total_tokens))
    }

    fn finish_reason(reason: &str) -> FinishReason {
        match reason {
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::Error,
            _ => FinishReason::Stop,
        }
    }

    fn payload(&self, request: &CompletionRequest) -> Result<Value> {
        let system_message = json!({
            "role": "system",
            "content": request.system
        });

        // create messages array with system message first
        let mut messages_array = vec![system_message];
        messages_array.extend(messages_to_openai_spec(&request.messages)?);

        let mut payload = Map::new();
        payload.insert(
            "model".to_string(),
            json!(request.model.as_deref().unwrap_or(&self.config.model)),
        );
        payload.insert("messages".to_string(), Value::Array(messages_array));

        if !request.tools.is_empty() {
            payload.insert("tools".to_string(), json!(tools_to_openai_spec(&request.tools)?));
        }
        if let Some(schema) = &request.response_schema {
            payload.insert("response_format".to_string(), response_format(schema));
        }
        if let Some(temp) = request.temperature.or(self.config.temperature) {
            payload.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = request.max_tokens.or(self.config.max_tokens) {
            payload.insert("max_tokens".to_string(), json!(tokens));
        }

        Ok(Value::Object(payload))
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("Request failed: {}\nResponse: {}", status, body))
            }
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<(Message, Usage)> {
        let payload = self.payload(request)?;
        let response: Value = self.post(&payload).await?.json().await?;

        if let Some(error) = response.get("error") {
            return Err(anyhow!("OpenAI API error: {}", error));
        }

        let usage = Self::get_usage(&response).unwrap_or_default();
        let message = openai_response_to_message(response)?;

        Ok((message, usage))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ProviderStream> {
        let mut payload = self.payload(request)?;
        payload["stream"] = json!(true);
        payload["stream_options"] = json!({"include_usage": true});

        let response = self.post(&payload).await?;
        Ok(Box::pin(decode_stream(response.bytes_stream())))
    }
}

/// Tool call fragments keyed by their position in the response
#[derive(Default)]
struct ToolCallBuffer {
    calls: BTreeMap<u64, (String, String, String)>,
}

impl ToolCallBuffer {
    fn push(&mut self, fragment: &Value) {
        let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
        let (id, name, arguments) = self.calls.entry(index).or_default();
        if let Some(part) = fragment.get("id").and_then(Value::as_str) {
            id.push_str(part);
        }
        if let Some(part) = fragment["function"].get("name").and_then(Value::as_str) {
            name.push_str(part);
        }
        if let Some(part) = fragment["function"].get("arguments").and_then(Value::as_str) {
            arguments.push_str(part);
        }
    }

    fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn finish(self) -> Vec<ToolRequest> {
        self.calls
            .into_values()
            .filter_map(|(id, name, arguments)| match parse_tool_call(&id, &name, &arguments) {
                MessageContent::ToolRequest(request) => Some(request),
                _ => None,
            })
            .collect()
    }
}

fn decode_stream<S>(body: S) -> impl Stream<Item = Result<ProviderEvent>>
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut events = Box::pin(sse_events(body));
        let mut tool_calls = ToolCallBuffer::default();
        let mut finish = None;

        while let Some(event) = events.next().await {
            let event = event?;
            if event.data == "[DONE]" {
                break;
            }
            let chunk: Value = serde_json::from_str(&event.data)?;
            if let Some(error) = chunk.get("error") {
                Err::<(), _>(anyhow!("OpenAI API error: {}", error))?;
            }

            if let Some(choices) = chunk.get("choices").and_then(Value::as_array) {
                for choice in choices {
                    let delta = &choice["delta"];
                    if let Some(text) = delta.get("content").and_then(Value::as_str) {
                        if !text.is_empty() {
                            yield ProviderEvent::TextDelta(text.to_string());
                        }
                    }
                    if let Some(fragments) = delta.get("tool_calls").and_then(Value::as_array) {
                        for fragment in fragments {
                            tool_calls.push(fragment);
                        }
                    }
                    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                        finish = Some(OpenAiProvider::finish_reason(reason));
                    }
                }
            }

            if let Some(usage) = OpenAiProvider::get_usage(&chunk) {
                yield ProviderEvent::Usage(usage);
            }
        }

        let finish = finish.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });
        for request in tool_calls.finish() {
            yield ProviderEvent::ToolRequest(request);
        }
        yield ProviderEvent::Finish(finish);
    }
}
