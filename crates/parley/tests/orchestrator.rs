use futures::StreamExt;
use parley::{
    chat::ChatOrchestrator,
    dispatcher::{ToolDispatcher, ToolRegistry},
    errors::ChatError,
    invoker::{GenerateOptions, ModelInvoker},
    models::{
        message::{Message, MessageContent},
        role::Role,
        tool::ToolCall,
        ui::{UiMessage, UiPart},
    },
    multiplexer::StreamChunk,
    normalizer::normalize,
    protocol::encode_sse,
    providers::{
        base::FinishReason,
        mock::{MockProvider, MockReply},
    },
    search::{SearchBackend, SearchResponse},
    systems::FileSystem,
    workflow::{
        FollowUpSuggestions, ModelRoute, ModelRouter, ResearchConfig, ResearchWorkflow,
        RouterConfig,
    },
};
use serde_json::json;
use std::sync::Arc;

fn user(text: &str) -> UiMessage {
    UiMessage::new(format!("u-{}", text.len()), Role::User, vec![UiPart::text(text)])
}

fn text_of(chunks: &[StreamChunk]) -> String {
    chunks
        .iter()
        .filter_map(|chunk| match chunk {
            StreamChunk::TextDelta { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn text_only_conversation_keeps_role_text_and_order() {
    let conversation = vec![
        UiMessage::new("a", Role::User, vec![UiPart::text("What is 2+2?")]),
        UiMessage::new("b", Role::Assistant, vec![UiPart::text("4")]),
        UiMessage::new("c", Role::User, vec![UiPart::text(""), UiPart::text(" and 3+3?")]),
    ];

    let messages = normalize(&conversation).unwrap();

    let flattened: Vec<(Role, Vec<&str>)> = messages
        .iter()
        .map(|message| {
            (
                message.role,
                message
                    .content
                    .iter()
                    .filter_map(MessageContent::as_text)
                    .collect(),
            )
        })
        .collect();
    assert_eq!(
        flattened,
        vec![
            (Role::User, vec!["What is 2+2?"]),
            (Role::Assistant, vec!["4"]),
            (Role::User, vec!["", " and 3+3?"]),
        ]
    );
}

#[tokio::test]
async fn streamed_chunks_arrive_in_order_with_one_terminal_chunk() {
    let provider = Arc::new(MockProvider::chunks(&["Hello", " world"]));
    let orchestrator = ChatOrchestrator::new(ModelInvoker::new(provider));

    let chunks: Vec<StreamChunk> = orchestrator.respond(vec![user("hi")]).collect().await;

    assert_eq!(text_of(&chunks), "Hello world");
    assert_eq!(chunks.iter().filter(|c| c.is_terminal()).count(), 1);
    assert_eq!(chunks.last(), Some(&StreamChunk::Finish));

    let frames: Vec<String> = encode_sse(futures::stream::iter(chunks)).collect().await;
    assert_eq!(frames.last().map(String::as_str), Some("data: [DONE]\n\n"));
    assert!(frames.iter().all(|frame| frame.starts_with("data: ")));
}

#[tokio::test]
async fn always_calling_model_stops_at_the_step_limit() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ToolRegistry::builder()
        .system(Arc::new(FileSystem::with_root(dir.path().to_path_buf())))
        .build()
        .unwrap();
    let dispatcher = ToolDispatcher::new(Arc::new(registry), 4);
    let call = ToolCall::new("exists", json!({"pathToCheck": "missing.txt"}));

    let provider = Arc::new(MockProvider::always_calling(call.clone()));
    let generation = ModelInvoker::new(provider.clone())
        .generate(
            vec![Message::user().with_text("loop")],
            &GenerateOptions::new("system").with_tools(dispatcher.clone()),
        )
        .await
        .unwrap();

    assert_eq!(provider.call_count(), 4);
    assert_eq!(generation.steps, 4);
    assert_eq!(generation.finish_reason, FinishReason::StepLimit);
    assert_eq!(generation.truncation(), Some(ChatError::StepLimitExceeded(4)));

    // the streamed variant reports the truncation in the message metadata
    let provider = Arc::new(MockProvider::always_calling(call));
    let orchestrator = ChatOrchestrator::new(ModelInvoker::new(provider.clone())).with_tools(dispatcher);
    let chunks: Vec<StreamChunk> = orchestrator.respond(vec![user("loop")]).collect().await;

    assert_eq!(provider.call_count(), 4);
    let metadata = chunks
        .iter()
        .find_map(|chunk| match chunk {
            StreamChunk::MessageMetadata { metadata } => Some(metadata.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(metadata["truncated"], json!(true));
    assert_eq!(metadata["finishReason"], json!("step-limit"));
    assert_eq!(chunks.last(), Some(&StreamChunk::Finish));
}

#[tokio::test]
async fn null_suggestions_are_pruned() {
    let provider = Arc::new(MockProvider::new(vec![
        Message::assistant().with_text(r#"{"suggestions": ["a", "b", null]}"#)
    ]));

    let suggestions = FollowUpSuggestions::new(ModelInvoker::new(provider))
        .generate(vec![Message::user().with_text("hi")], "hello")
        .await
        .unwrap();

    assert_eq!(suggestions, vec!["a", "b"]);
}

#[tokio::test]
async fn unparseable_route_falls_back_to_default() {
    assert_eq!(ModelRoute::from_answer("maybe"), ModelRoute::default());

    let provider = Arc::new(MockProvider::new(vec![
        Message::assistant().with_text("maybe")
    ]));
    let router = ModelRouter::new(
        ModelInvoker::new(provider),
        RouterConfig {
            router_model: None,
            basic_model: "basic-model".into(),
            advanced_model: "advanced-model".into(),
        },
    );

    let route = router
        .route(&[Message::user().with_text("Is this hard?")])
        .await
        .unwrap();
    assert_eq!(route, ModelRoute::Basic);
    assert_eq!(router.model_for(route), "basic-model");
}

struct FlakySearch;

#[async_trait::async_trait]
impl SearchBackend for FlakySearch {
    async fn search(&self, query: &str, _max_results: usize) -> anyhow::Result<SearchResponse> {
        if query == "second" {
            anyhow::bail!("upstream timeout");
        }
        Ok(SearchResponse {
            query: query.to_string(),
            answer: Some("found".to_string()),
            results: Vec::new(),
        })
    }
}

#[tokio::test]
async fn search_fan_out_fails_as_a_whole() {
    let workflow = ResearchWorkflow::new(
        ModelInvoker::new(Arc::new(MockProvider::new(vec![]))),
        Arc::new(FlakySearch),
        ResearchConfig::default(),
    );
    let queries = vec!["first".to_string(), "second".to_string(), "third".to_string()];

    let result = workflow.search(&queries).await;

    assert!(matches!(result, Err(ChatError::Search(_))));
}

#[tokio::test]
async fn provider_failure_mid_stream_ends_with_error() {
    let provider = Arc::new(MockProvider::scripted(vec![MockReply::Broken {
        chunks: vec!["Partial".into()],
        error: "connection reset".into(),
    }]));
    let orchestrator = ChatOrchestrator::new(ModelInvoker::new(provider));

    let chunks: Vec<StreamChunk> = orchestrator.respond(vec![user("hi")]).collect().await;

    // what was already sent stays sent
    assert_eq!(text_of(&chunks), "Partial");
    assert!(matches!(chunks.last(), Some(StreamChunk::Error { error_text }) if error_text.contains("connection reset")));
    assert_eq!(chunks.iter().filter(|c| c.is_terminal()).count(), 1);
}
