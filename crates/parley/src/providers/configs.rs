use serde::{Deserialize, Serialize};

pub const OPENAI_DEFAULT_HOST: &str = "https://api.openai.com";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    #[serde(rename = "openai")]
    OpenAi(OpenAiProviderConfig),
    /// Scripted replies, for demos and tests without network access
    Mock(MockProviderConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default = "default_openai_host")]
    pub host: String,
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl OpenAiProviderConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: default_openai_host(),
            api_key: api_key.into(),
            model: default_openai_model(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockProviderConfig {
    /// Replies handed out in order, one per model call
    #[serde(default)]
    pub replies: Vec<String>,
}

fn default_openai_host() -> String {
    OPENAI_DEFAULT_HOST.to_string()
}

fn default_openai_model() -> String {
    OPENAI_DEFAULT_MODEL.to_string()
}
