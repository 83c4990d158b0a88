//! Pick a basic or an advanced model depending on how hard the question is
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};

use crate::errors::ChatResult;
use crate::invoker::{GenerateOptions, ModelInvoker};
use crate::models::message::Message;
use crate::models::ui::UiMessage;
use crate::multiplexer::{forward_increments, ui_message_stream, StreamChunk};
use crate::normalizer::normalize;
use crate::prompt_template::load_prompt_file;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ModelRoute {
    #[default]
    Basic,
    Advanced,
}

impl ModelRoute {
    /// Read the classifier's answer: `0`/`1` or a route name. Anything else
    /// falls back to the basic route.
    pub fn from_answer(answer: &str) -> Self {
        let answer = answer
            .trim()
            .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '.'))
            .trim();
        match answer {
            "0" => ModelRoute::Basic,
            "1" => ModelRoute::Advanced,
            other => other.parse().unwrap_or_else(|_| {
                warn!(answer = other, "could not parse route, using the default");
                ModelRoute::default()
            }),
        }
    }

    /// Message metadata announcing the route to the client
    pub fn metadata(self) -> Value {
        json!({ "model": self })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Model doing the classification; the provider default when unset
    #[serde(default)]
    pub router_model: Option<String>,
    pub basic_model: String,
    pub advanced_model: String,
}

/// ROUTE with a blocking classification, then EXECUTE on the chosen model
#[derive(Clone)]
pub struct ModelRouter {
    invoker: ModelInvoker,
    config: RouterConfig,
}

impl ModelRouter {
    pub fn new(invoker: ModelInvoker, config: RouterConfig) -> Self {
        Self { invoker, config }
    }

    pub fn model_for(&self, route: ModelRoute) -> &str {
        match route {
            ModelRoute::Basic => &self.config.basic_model,
            ModelRoute::Advanced => &self.config.advanced_model,
        }
    }

    pub async fn route(&self, conversation: &[Message]) -> ChatResult<ModelRoute> {
        let mut options = GenerateOptions::new(load_prompt_file("router.md", &json!({}))?);
        if let Some(model) = &self.config.router_model {
            options = options.with_model(model);
        }
        let answer = self.invoker.generate(conversation.to_vec(), &options).await?;
        let route = ModelRoute::from_answer(&answer.text);
        debug!(%route, answer = answer.text.trim(), "routed request");
        Ok(route)
    }

    pub fn run(&self, messages: Vec<UiMessage>) -> BoxStream<'static, StreamChunk> {
        let router = self.clone();
        ui_message_stream(move |writer| async move {
            let conversation = normalize(&messages)?;
            let route = router.route(&conversation).await?;
            writer
                .write(StreamChunk::MessageMetadata {
                    metadata: route.metadata(),
                })
                .await?;

            let system = load_prompt_file("system.md", &json!({ "systems": [] }))?;
            let options = GenerateOptions::new(system).with_model(router.model_for(route));
            forward_increments(&writer, router.invoker.stream(conversation, options)).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use crate::models::ui::UiPart;
    use crate::providers::mock::{MockProvider, MockReply};
    use futures::StreamExt;
    use std::sync::Arc;

    fn config() -> RouterConfig {
        RouterConfig {
            router_model: Some("router".into()),
            basic_model: "small".into(),
            advanced_model: "large".into(),
        }
    }

    #[test]
    fn test_parse_answers() {
        assert_eq!(ModelRoute::from_answer("1"), ModelRoute::Advanced);
        assert_eq!(ModelRoute::from_answer(" 0\n"), ModelRoute::Basic);
        assert_eq!(ModelRoute::from_answer("`1`"), ModelRoute::Advanced);
        assert_eq!(ModelRoute::from_answer("Advanced"), ModelRoute::Advanced);
        assert_eq!(ModelRoute::from_answer("basic."), ModelRoute::Basic);
    }

    #[test]
    fn test_unparseable_answer_falls_back_to_basic() {
        assert_eq!(ModelRoute::from_answer("maybe"), ModelRoute::Basic);
        assert_eq!(ModelRoute::from_answer(""), ModelRoute::Basic);
        assert_eq!(ModelRoute::from_answer("10"), ModelRoute::Basic);
    }

    #[tokio::test]
    async fn test_run_uses_routed_model_and_tags_metadata() {
        let provider = Arc::new(MockProvider::scripted(vec![
            MockReply::Message(Message::assistant().with_text("1")),
            MockReply::Chunks(vec!["Deep".into(), " answer".into()]),
        ]));
        let router = ModelRouter::new(ModelInvoker::new(provider.clone()), config());
        let messages = vec![UiMessage::new(
            "1",
            Role::User,
            vec![UiPart::text("Prove the four colour theorem")],
        )];

        let chunks: Vec<StreamChunk> = router.run(messages).collect().await;

        assert!(chunks.contains(&StreamChunk::MessageMetadata {
            metadata: json!({"model": "advanced"})
        }));
        let requests = provider.requests();
        assert_eq!(requests[0].model.as_deref(), Some("router"));
        assert!(requests[0].system.contains("Return only 0 or 1"));
        assert_eq!(requests[1].model.as_deref(), Some("large"));
        assert_eq!(requests[1].messages[0].text(), "Prove the four colour theorem");
        assert_eq!(chunks.last(), Some(&StreamChunk::Finish));
    }

    #[tokio::test]
    async fn test_maybe_routes_to_basic_model() {
        let provider = Arc::new(MockProvider::scripted(vec![
            MockReply::Message(Message::assistant().with_text("maybe")),
            MockReply::Chunks(vec!["Hi".into()]),
        ]));
        let router = ModelRouter::new(ModelInvoker::new(provider.clone()), config());
        let messages = vec![UiMessage::new("1", Role::User, vec![UiPart::text("hi")])];

        let chunks: Vec<StreamChunk> = router.run(messages).collect().await;

        assert!(chunks.contains(&StreamChunk::MessageMetadata {
            metadata: json!({"model": "basic"})
        }));
        assert_eq!(provider.requests()[1].model.as_deref(), Some("small"));
    }
}
