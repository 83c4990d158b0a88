use anyhow::Result;
use parley::chat::ChatOrchestrator;
use parley::dispatcher::{ToolDispatcher, ToolRegistry};
use parley::invoker::ModelInvoker;
use parley::providers::factory::get_provider;
use parley::search::{SearchBackend, TavilyClient};
use parley::systems::FileSystem;
use parley::workflow::{
    DraftReviseWorkflow, FollowUpSuggestions, ModelRouter, ResearchConfig, ResearchWorkflow,
    RouterConfig, TitleGenerator,
};
use std::sync::Arc;
use tracing::info;

use crate::configuration::{ChatSettings, Settings};

/// Shared application state, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub chat: ChatOrchestrator,
    pub drafts: DraftReviseWorkflow,
    pub router: ModelRouter,
    pub titles: TitleGenerator,
    /// Present when a search backend is configured
    pub research: Option<ResearchWorkflow>,
}

impl AppState {
    pub fn new(
        invoker: ModelInvoker,
        tools: Option<ToolDispatcher>,
        search: Option<Arc<dyn SearchBackend>>,
        chat_settings: &ChatSettings,
        research: ResearchConfig,
        router: RouterConfig,
    ) -> Self {
        let mut chat = ChatOrchestrator::new(invoker.clone());
        if let Some(tools) = tools {
            chat = chat.with_tools(tools);
        }
        if chat_settings.suggestions {
            chat = chat.with_suggestions(
                FollowUpSuggestions::new(invoker.clone()).with_count(chat_settings.suggestion_count),
            );
        }

        let research = search.map(|search| ResearchWorkflow::new(invoker.clone(), search, research));

        Self {
            chat,
            drafts: DraftReviseWorkflow::new(invoker.clone()),
            titles: TitleGenerator::new(invoker.clone()),
            router: ModelRouter::new(invoker, router),
            research,
        }
    }

    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let Settings {
            provider,
            chat,
            search,
            router,
            research,
            ..
        } = settings;

        let provider_type = provider.provider_type();
        let provider = get_provider(provider.into_config())?;
        info!(%provider_type, "provider ready");

        let filesystem = FileSystem::new(&chat.sandbox_root).await?;
        info!(root = %filesystem.root().display(), "filesystem sandbox ready");
        let registry = ToolRegistry::builder().system(Arc::new(filesystem)).build()?;
        let tools = ToolDispatcher::new(Arc::new(registry), chat.max_steps);

        let search = match search.into_config() {
            Some(config) => Some(Arc::new(TavilyClient::new(config)?) as Arc<dyn SearchBackend>),
            None => {
                info!("no search api key, research is disabled");
                None
            }
        };

        Ok(Self::new(
            ModelInvoker::new(provider),
            Some(tools),
            search,
            &chat,
            research,
            router.into_config(),
        ))
    }
}
