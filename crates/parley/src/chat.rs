//! One chat turn end to end: normalize, stream the answer with tools, then
//! offer follow-up suggestions
use futures::stream::BoxStream;
use serde_json::json;
use tracing::{debug, warn};

use crate::dispatcher::ToolDispatcher;
use crate::errors::ChatResult;
use crate::invoker::{GenerateOptions, Generation, ModelInvoker};
use crate::models::message::Message;
use crate::models::ui::UiMessage;
use crate::multiplexer::{forward_increments, ui_message_stream, StreamChunk};
use crate::normalizer::normalize;
use crate::prompt_template::load_prompt_file;
use crate::workflow::FollowUpSuggestions;

/// Cheap to clone; build it once at startup and hand a copy to every request
#[derive(Clone)]
pub struct ChatOrchestrator {
    invoker: ModelInvoker,
    dispatcher: Option<ToolDispatcher>,
    suggestions: Option<FollowUpSuggestions>,
    model: Option<String>,
}

impl ChatOrchestrator {
    pub fn new(invoker: ModelInvoker) -> Self {
        Self {
            invoker,
            dispatcher: None,
            suggestions: None,
            model: None,
        }
    }

    pub fn with_tools(mut self, dispatcher: ToolDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_suggestions(mut self, suggestions: FollowUpSuggestions) -> Self {
        self.suggestions = Some(suggestions);
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn invoker(&self) -> &ModelInvoker {
        &self.invoker
    }

    fn options(&self) -> ChatResult<GenerateOptions> {
        let systems = self
            .dispatcher
            .as_ref()
            .map(|dispatcher| dispatcher.registry().systems_info())
            .unwrap_or_default();
        let system = load_prompt_file("system.md", &json!({ "systems": systems }))?;

        let mut options = GenerateOptions::new(system);
        if let Some(model) = &self.model {
            options = options.with_model(model);
        }
        if let Some(dispatcher) = &self.dispatcher {
            options = options.with_tools(dispatcher.clone());
        }
        Ok(options)
    }

    /// Stream the reply to a UI conversation
    pub fn respond(&self, messages: Vec<UiMessage>) -> BoxStream<'static, StreamChunk> {
        let orchestrator = self.clone();
        ui_message_stream(move |writer| async move {
            let conversation = normalize(&messages)?;
            debug!(messages = conversation.len(), "responding");

            let answer = orchestrator
                .invoker
                .stream(conversation.clone(), orchestrator.options()?);
            let generation = forward_increments(&writer, answer).await?;
            if let Some(truncation) = generation.truncation() {
                warn!(%truncation, "answer cut short by the step limit");
            }

            if let Some(suggestions) = &orchestrator.suggestions {
                if !generation.text.trim().is_empty() {
                    suggestions
                        .stream(&writer, conversation, &generation.text)
                        .await?;
                }
            }
            Ok(())
        })
    }

    /// Answer a single prompt and wait for the result
    pub async fn ask(&self, prompt: &str) -> ChatResult<Generation> {
        let messages = vec![Message::user().with_text(prompt)];
        self.invoker.generate(messages, &self.options()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ToolRegistry;
    use crate::models::role::Role;
    use crate::models::tool::ToolCall;
    use crate::models::ui::UiPart;
    use crate::providers::mock::{MockProvider, MockReply};
    use crate::systems::FileSystem;
    use futures::StreamExt;
    use std::sync::Arc;

    fn hello() -> Vec<UiMessage> {
        vec![UiMessage::new("1", Role::User, vec![UiPart::text("Hello")])]
    }

    fn kinds(chunks: &[StreamChunk]) -> Vec<String> {
        chunks.iter().map(StreamChunk::kind).collect()
    }

    #[tokio::test]
    async fn test_respond_with_tools_then_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::builder()
            .system(Arc::new(FileSystem::with_root(dir.path().to_path_buf())))
            .build()
            .unwrap();
        let provider = Arc::new(MockProvider::scripted(vec![
            MockReply::Message(Message::assistant().with_tool_request(
                "call_1",
                Ok(ToolCall::new(
                    "writeFile",
                    json!({"filePath": "notes.txt", "content": "hi"}),
                )),
            )),
            MockReply::Chunks(vec!["Saved ".into(), "notes.txt".into()]),
            MockReply::Message(
                Message::assistant().with_text(r#"{"suggestions": ["Read it back?"]}"#),
            ),
        ]));
        let invoker = ModelInvoker::new(provider.clone());
        let orchestrator = ChatOrchestrator::new(invoker.clone())
            .with_tools(ToolDispatcher::new(Arc::new(registry), 5))
            .with_suggestions(FollowUpSuggestions::new(invoker));

        let chunks: Vec<StreamChunk> = orchestrator.respond(hello()).collect().await;
        let kinds = kinds(&chunks);

        assert_eq!(kinds.first().map(String::as_str), Some("start"));
        assert_eq!(kinds.last().map(String::as_str), Some("finish"));
        let position = |kind: &str| kinds.iter().position(|k| k == kind).unwrap();
        assert!(position("tool-input-available") < position("tool-output-available"));
        assert!(position("tool-output-available") < position("text-delta"));
        assert!(position("message-metadata") < position("data-suggestions"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "hi"
        );

        let requests = provider.requests();
        assert!(requests[0].system.contains("FileSystem"));
        assert_eq!(requests[0].tools.len(), 7);
        assert!(requests[2].tools.is_empty());
        let suggestions = chunks
            .iter()
            .find_map(|chunk| match chunk {
                StreamChunk::Data { data, .. } => Some(data.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(suggestions, json!(["Read it back?"]));
    }

    #[tokio::test]
    async fn test_unsupported_part_fails_before_calling_the_model() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let orchestrator = ChatOrchestrator::new(ModelInvoker::new(provider.clone()));
        let part = UiPart::Other {
            kind: "source-url".into(),
            payload: json!({"type": "source-url", "url": "https://example.com"}),
        };
        let messages = vec![UiMessage::new("1", Role::User, vec![part])];

        let chunks: Vec<StreamChunk> = orchestrator.respond(messages).collect().await;

        assert_eq!(kinds(&chunks), vec!["start", "error"]);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ask_returns_text() {
        let provider = Arc::new(MockProvider::new(vec![
            Message::assistant().with_text("Paris")
        ]));
        let orchestrator = ChatOrchestrator::new(ModelInvoker::new(provider)).with_model("gpt-4o");

        let generation = orchestrator.ask("Capital of France?").await.unwrap();
        assert_eq!(generation.text, "Paris");
    }
}
