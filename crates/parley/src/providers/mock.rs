use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crate::models::message::Message;
use crate::models::tool::ToolCall;
use crate::providers::base::{
    message_to_events, CompletionRequest, FinishReason, Provider, ProviderEvent, ProviderStream,
    Usage,
};

/// One scripted model call
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Reply with a complete message
    Message(Message),
    /// Stream these text deltas
    Chunks(Vec<String>),
    /// Stream these text deltas, then fail
    Broken { chunks: Vec<String>, error: String },
    /// Fail before producing anything
    Fail(String),
}

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    responses: Arc<Mutex<Vec<MockReply>>>,
    /// Reply used once the script runs out
    fallback: Option<ToolCall>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::scripted(responses.into_iter().map(MockReply::Message).collect())
    }

    pub fn scripted(replies: Vec<MockReply>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(replies)),
            fallback: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Stream the given chunks as the only reply
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::scripted(vec![MockReply::Chunks(
            chunks.iter().map(|c| c.to_string()).collect(),
        )])
    }

    /// A model that requests the same tool on every call, forever
    pub fn always_calling(tool_call: ToolCall) -> Self {
        Self {
            fallback: Some(tool_call),
            ..Self::scripted(Vec::new())
        }
    }

    /// Pause between streamed events
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &CompletionRequest) -> Result<MockReply> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .map_err(|_| anyhow!("mock provider state poisoned"))?
            .push(request.clone());

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| anyhow!("mock provider state poisoned"))?;
        if !responses.is_empty() {
            return Ok(responses.remove(0));
        }
        Ok(match &self.fallback {
            Some(tool_call) => MockReply::Message(
                Message::assistant().with_tool_request(format!("mock_call_{}", call), Ok(tool_call.clone())),
            ),
            // Return empty response if no more pre-configured responses
            None => MockReply::Message(Message::assistant().with_text("")),
        })
    }
}

fn usage() -> Usage {
    Usage::new(Some(1), Some(1), Some(2))
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<(Message, Usage)> {
        match self.next_reply(request)? {
            MockReply::Message(message) => Ok((message, usage())),
            MockReply::Chunks(chunks) => {
                Ok((Message::assistant().with_text(chunks.concat()), usage()))
            }
            MockReply::Broken { error, .. } | MockReply::Fail(error) => Err(anyhow!(error)),
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ProviderStream> {
        let events: Vec<Result<ProviderEvent>> = match self.next_reply(request)? {
            MockReply::Message(message) => message_to_events(message, usage())
                .into_iter()
                .map(Ok)
                .collect(),
            MockReply::Chunks(chunks) => chunks
                .into_iter()
                .map(|chunk| Ok(ProviderEvent::TextDelta(chunk)))
                .chain([
                    Ok(ProviderEvent::Usage(usage())),
                    Ok(ProviderEvent::Finish(FinishReason::Stop)),
                ])
                .collect(),
            MockReply::Broken { chunks, error } => chunks
                .into_iter()
                .map(|chunk| Ok(ProviderEvent::TextDelta(chunk)))
                .chain([Err(anyhow!(error))])
                .collect(),
            MockReply::Fail(error) => return Err(anyhow!(error)),
        };

        let stream = futures::stream::iter(events);
        match self.delay {
            Some(delay) => Ok(Box::pin(stream.then(move |event| async move {
                tokio::time::sleep(delay).await;
                event
            }))),
            None => Ok(Box::pin(stream)),
        }
    }
}
