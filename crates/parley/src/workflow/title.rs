//! Short chat titles generated from the first message
use regex::Regex;
use serde_json::json;

use crate::errors::ChatResult;
use crate::invoker::{GenerateOptions, ModelInvoker};
use crate::models::message::Message;
use crate::prompt_template::load_prompt_file;

#[derive(Clone)]
pub struct TitleGenerator {
    invoker: ModelInvoker,
    max_length: usize,
    model: Option<String>,
}

impl TitleGenerator {
    pub fn new(invoker: ModelInvoker) -> Self {
        Self {
            invoker,
            max_length: 150,
            model: None,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub async fn generate(&self, first_message: &str) -> ChatResult<String> {
        let prompt = load_prompt_file(
            "title.md",
            &json!({ "message": first_message, "max_length": self.max_length }),
        )?;
        let mut options = GenerateOptions::new("You are a helpful assistant.");
        if let Some(model) = &self.model {
            options = options.with_model(model);
        }
        let generation = self
            .invoker
            .generate(vec![Message::user().with_text(prompt)], &options)
            .await?;
        Ok(extract_title(&generation.text))
    }
}

/// The text inside `<response>` tags, or the whole reply when the model
/// skipped them
pub fn extract_title(text: &str) -> String {
    let tagged = Regex::new(r"(?s)<response>(.*?)</response>")
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|captures| captures.get(1))
        .map_or(text, |m| m.as_str());
    tagged
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .trim()
        .to_string()
}
