// Export route modules
pub mod reply;
pub mod workflow;

use axum::{routing::get, Router};

use crate::state::AppState;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .route("/status", get(|| async { "ok" }))
        .merge(reply::routes(state.clone()))
        .merge(workflow::routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::ChatSettings;
    use axum::body::Body;
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use parley::invoker::ModelInvoker;
    use parley::dispatcher::{ToolDispatcher, ToolRegistry};
    use parley::models::message::Message;
    use parley::models::tool::ToolCall;
    use parley::systems::FileSystem;
    use parley::providers::mock::{MockProvider, MockReply};
    use parley::workflow::{ResearchConfig, RouterConfig};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(replies: Vec<MockReply>) -> Router {
        app_with_tools(replies, None)
    }

    fn app_with_tools(replies: Vec<MockReply>, tools: Option<ToolDispatcher>) -> Router {
        let invoker = ModelInvoker::new(Arc::new(MockProvider::scripted(replies)));
        let chat = ChatSettings {
            suggestions: false,
            ..Default::default()
        };
        let router = RouterConfig {
            router_model: None,
            basic_model: "small".into(),
            advanced_model: "large".into(),
        };
        configure(AppState::new(
            invoker,
            tools,
            None,
            &chat,
            ResearchConfig::default(),
            router,
        ))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn conversation() -> Value {
        json!({
            "messages": [
                {"id": "1", "role": "user", "parts": [{"type": "text", "text": "Hello"}]}
            ]
        })
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// The JSON payload of every `data:` frame, minus the terminator
    fn frames(body: &str) -> Vec<Value> {
        body.split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .filter(|data| *data != "[DONE]")
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_status() {
        let response = app(vec![])
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn test_reply_streams_ui_message_protocol() {
        let response = app(vec![MockReply::Chunks(vec!["Hello".into(), " world".into()])])
            .oneshot(post_json("/reply", conversation()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["x-vercel-ai-ui-message-stream"],
            "v1"
        );
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let body = body_text(response).await;
        assert!(body.ends_with("data: [DONE]\n\n"));
        let frames = frames(&body);
        assert_eq!(frames.first().unwrap()["type"], "start");
        assert_eq!(frames.last().unwrap()["type"], "finish");
        let text: String = frames
            .iter()
            .filter(|frame| frame["type"] == "text-delta")
            .map(|frame| frame["delta"].as_str().unwrap())
            .collect();
        assert_eq!(text, "Hello world");
    }

    #[tokio::test]
    async fn test_reply_runs_tools_in_the_sandbox() {
        let sandbox = tempfile::tempdir().unwrap();
        std::fs::write(sandbox.path().join("notes.md"), "# Notes").unwrap();
        let registry = ToolRegistry::builder()
            .system(Arc::new(FileSystem::with_root(sandbox.path().to_path_buf())))
            .build()
            .unwrap();
        let tools = ToolDispatcher::new(Arc::new(registry), 3);

        let response = app_with_tools(
            vec![
                MockReply::Message(Message::assistant().with_tool_request(
                    "call_1",
                    Ok(ToolCall::new("readFile", json!({"filePath": "notes.md"}))),
                )),
                MockReply::Chunks(vec!["It says Notes.".into()]),
            ],
            Some(tools),
        )
        .oneshot(post_json("/reply", conversation()))
        .await
        .unwrap();

        let frames = frames(&body_text(response).await);
        let output = frames
            .iter()
            .find(|frame| frame["type"] == "tool-output-available")
            .unwrap();
        assert_eq!(output["toolCallId"], "call_1");
        assert_eq!(output["output"]["content"], "# Notes");
        assert_eq!(frames.last().unwrap()["type"], "finish");
    }

    #[tokio::test]
    async fn test_reply_rejects_malformed_messages() {
        let response = app(vec![])
            .oneshot(post_json("/reply", json!({"messages": [{"role": "user", "parts": [{"text": "no type tag"}]}]})))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_ask_returns_trimmed_text() {
        let response = app(vec![MockReply::Message(
            Message::assistant().with_text("  Paris\n"),
        )])
        .oneshot(post_json("/ask", json!({"prompt": "Capital of France?"})))
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({"response": "Paris"}));
    }

    #[tokio::test]
    async fn test_ask_reports_provider_failure() {
        let response = app(vec![MockReply::Fail("quota exceeded".into())])
            .oneshot(post_json("/ask", json!({"prompt": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_route_workflow_tags_metadata() {
        let response = app(vec![
            MockReply::Message(Message::assistant().with_text("1")),
            MockReply::Chunks(vec!["Considered answer".into()]),
        ])
        .oneshot(post_json("/workflow/route", conversation()))
        .await
        .unwrap();

        let frames = frames(&body_text(response).await);
        assert!(frames.iter().any(|frame| {
            frame["type"] == "message-metadata" && frame["messageMetadata"]["model"] == "advanced"
        }));
    }

    #[tokio::test]
    async fn test_research_needs_a_search_backend() {
        let response = app(vec![])
            .oneshot(post_json("/workflow/research", conversation()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_title_from_first_user_message() {
        let response = app(vec![MockReply::Message(
            Message::assistant().with_text("<response>\"Greetings\"</response>"),
        )])
        .oneshot(post_json("/workflow/title", conversation()))
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({"title": "Greetings"}));
    }

    #[tokio::test]
    async fn test_title_needs_a_user_message() {
        let response = app(vec![])
            .oneshot(post_json("/workflow/title", json!({"messages": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
