//! Follow-up questions offered once the main answer is complete
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{ChatError, ChatResult};
use crate::invoker::{GenerateOptions, Increment, ModelInvoker};
use crate::models::message::Message;
use crate::multiplexer::{PartId, StreamChunk, StreamWriter};
use crate::prompt_template::load_prompt_file;

pub const SUGGESTIONS_PART: &str = "suggestions";

fn suggestions_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "suggestions": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["suggestions"]
    })
}

fn suggestions_from(value: &Value) -> Vec<String> {
    value
        .get("suggestions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct FollowUpSuggestions {
    invoker: ModelInvoker,
    count: usize,
    model: Option<String>,
}

impl FollowUpSuggestions {
    pub fn new(invoker: ModelInvoker) -> Self {
        Self {
            invoker,
            count: 3,
            model: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The conversation, the finished answer, and the follow-up question
    fn request(
        &self,
        mut conversation: Vec<Message>,
        answer: &str,
    ) -> ChatResult<(Vec<Message>, GenerateOptions)> {
        let ask = load_prompt_file("suggestions.md", &json!({ "count": self.count }))?;
        conversation.push(Message::assistant().with_text(answer));
        conversation.push(Message::user().with_text(ask));

        let mut options = GenerateOptions::new("You are a helpful assistant.")
            .with_schema(suggestions_schema());
        if let Some(model) = &self.model {
            options = options.with_model(model);
        }
        Ok((conversation, options))
    }

    pub async fn generate(&self, conversation: Vec<Message>, answer: &str) -> ChatResult<Vec<String>> {
        let (messages, options) = self.request(conversation, answer)?;
        let generation = self.invoker.generate(messages, &options).await?;
        let output = generation.output.ok_or_else(|| {
            ChatError::SchemaViolation("the model produced no suggestions".to_string())
        })?;
        Ok(suggestions_from(&output))
    }

    /// Stream the suggestions as one `data-suggestions` part that is
    /// replaced in place as the list grows
    pub async fn stream(
        &self,
        writer: &StreamWriter,
        conversation: Vec<Message>,
        answer: &str,
    ) -> ChatResult<Vec<String>> {
        let (messages, options) = self.request(conversation, answer)?;
        let id = PartId::new();
        let mut written: Option<Vec<String>> = None;
        let mut increments = self.invoker.stream(messages, options);

        while let Some(increment) = increments.next().await {
            let suggestions = match increment? {
                Increment::PartialOutput(partial) => suggestions_from(&partial),
                Increment::Finished(generation) => generation
                    .output
                    .as_ref()
                    .map(suggestions_from)
                    .unwrap_or_default(),
                _ => continue,
            };
            if written.as_ref() != Some(&suggestions) {
                writer
                    .write(StreamChunk::data(SUGGESTIONS_PART, &id, json!(suggestions)))
                    .await?;
                written = Some(suggestions);
            }
        }

        let suggestions = written.unwrap_or_default();
        debug!(count = suggestions.len(), "suggested follow-ups");
        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::ui_message_stream;
    use crate::providers::mock::{MockProvider, MockReply};
    use std::sync::Arc;

    fn conversation() -> Vec<Message> {
        vec![Message::user().with_text("What is Rust?")]
    }

    #[tokio::test]
    async fn test_null_suggestions_are_dropped() {
        let provider = Arc::new(MockProvider::new(vec![
            Message::assistant().with_text(r#"{"suggestions": ["a", "b", null]}"#)
        ]));
        let suggestions = FollowUpSuggestions::new(ModelInvoker::new(provider.clone()));

        let result = suggestions
            .generate(conversation(), "A systems language.")
            .await
            .unwrap();

        assert_eq!(result, vec!["a", "b"]);
        let request = &provider.requests()[0];
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].text(), "A systems language.");
        assert!(request.messages[2].text().starts_with("What question should I ask next?"));
        assert!(request.response_schema.is_some());
    }

    #[tokio::test]
    async fn test_stream_replaces_one_data_part() {
        let provider = Arc::new(MockProvider::scripted(vec![MockReply::Chunks(vec![
            "{\"suggestions\": [\"Why".into(),
            " ownership?\", null, ".into(),
            "\"What is a trait?\"]}".into(),
        ])]));
        let suggestions = FollowUpSuggestions::new(ModelInvoker::new(provider));

        let (tx, rx) = tokio::sync::oneshot::channel();
        let chunks: Vec<StreamChunk> = ui_message_stream(move |writer| async move {
            let result = suggestions
                .stream(&writer, conversation(), "A systems language.")
                .await?;
            let _ = tx.send(result);
            Ok(())
        })
        .collect()
        .await;

        assert_eq!(rx.await.unwrap(), vec!["Why ownership?", "What is a trait?"]);

        let parts: Vec<(&Option<String>, &Value)> = chunks
            .iter()
            .filter_map(|chunk| match chunk {
                StreamChunk::Data { name, id, data } if name == SUGGESTIONS_PART => Some((id, data)),
                _ => None,
            })
            .collect();
        assert!(!parts.is_empty());
        assert!(parts.iter().all(|(id, _)| *id == parts[0].0));
        assert_eq!(
            parts.last().unwrap().1,
            &json!(["Why ownership?", "What is a trait?"])
        );
        assert!(parts
            .iter()
            .all(|(_, data)| data.as_array().unwrap().iter().all(|s| !s.is_null())));
        assert_eq!(chunks.last(), Some(&StreamChunk::Finish));
    }
}
