use std::sync::Arc;

use super::{
    base::Provider,
    configs::ProviderConfig,
    mock::MockProvider,
    openai::OpenAiProvider,
};
use crate::models::message::Message;
use anyhow::Result;
use strum_macros::{Display, EnumIter};

#[derive(EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderType {
    #[strum(serialize = "openai")]
    OpenAi,
    Mock,
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderConfig::OpenAi(_) => ProviderType::OpenAi,
            ProviderConfig::Mock(_) => ProviderType::Mock,
        }
    }
}

/// Build the process-wide provider client
pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Arc::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::Mock(mock_config) => {
            let replies = mock_config
                .replies
                .into_iter()
                .map(|reply| Message::assistant().with_text(reply))
                .collect();
            Ok(Arc::new(MockProvider::new(replies)))
        }
    }
}
