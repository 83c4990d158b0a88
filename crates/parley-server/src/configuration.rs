use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use parley::providers::configs::{
    MockProviderConfig, OpenAiProviderConfig, ProviderConfig, OPENAI_DEFAULT_HOST,
    OPENAI_DEFAULT_MODEL,
};
use parley::providers::factory::ProviderType;
use parley::search::{TavilyConfig, TAVILY_DEFAULT_HOST};
use parley::workflow::{ResearchConfig, RouterConfig};
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    #[serde(rename = "openai")]
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Mock {
        #[serde(default)]
        replies: Vec<String>,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
            ProviderSettings::Mock { .. } => ProviderType::Mock,
        }
    }

    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Mock { replies } => {
                ProviderConfig::Mock(MockProviderConfig { replies })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatSettings {
    /// Model steps allowed per turn before the tool loop is cut short
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: String,
    #[serde(default = "default_true")]
    pub suggestions: bool,
    #[serde(default = "default_suggestion_count")]
    pub suggestion_count: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            sandbox_root: default_sandbox_root(),
            suggestions: true,
            suggestion_count: default_suggestion_count(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_search_host")]
    pub host: String,
    /// Research is disabled without a key
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            host: default_search_host(),
            api_key: None,
        }
    }
}

impl SearchSettings {
    pub fn into_config(self) -> Option<TavilyConfig> {
        let host = self.host;
        self.api_key.map(|api_key| TavilyConfig { host, api_key })
    }
}

#[derive(Debug, Deserialize)]
pub struct RouterSettings {
    #[serde(default)]
    pub router_model: Option<String>,
    #[serde(default = "default_model")]
    pub basic_model: String,
    #[serde(default = "default_advanced_model")]
    pub advanced_model: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            router_model: None,
            basic_model: default_model(),
            advanced_model: default_advanced_model(),
        }
    }
}

impl RouterSettings {
    pub fn into_config(self) -> RouterConfig {
        RouterConfig {
            router_model: self.router_model,
            basic_model: self.basic_model,
            advanced_model: self.advanced_model,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub research: ResearchConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        // Start with default configuration
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("chat.max_steps", default_max_steps() as u64)?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("PARLEY")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("provider.replies")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

/// Field path out of "missing field `api_key` for key `provider`"
fn missing_field(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    match rest
        .strip_prefix(" for key `")
        .and_then(|rest| rest.split_once('`'))
    {
        Some((key, _)) => Some(format!("{}.{}", key, field)),
        None => Some(field.to_string()),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_model() -> String {
    OPENAI_DEFAULT_MODEL.to_string()
}

fn default_advanced_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_host() -> String {
    OPENAI_DEFAULT_HOST.to_string()
}

fn default_search_host() -> String {
    TAVILY_DEFAULT_HOST.to_string()
}

fn default_max_steps() -> usize {
    10
}

fn default_sandbox_root() -> String {
    "~/.parley/sandbox".to_string()
}

fn default_true() -> bool {
    true
}

fn default_suggestion_count() -> usize {
    3
}
