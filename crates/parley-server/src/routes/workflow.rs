use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use parley::models::role::Role;
use serde::Serialize;

use super::reply::{ChatRequest, SseResponse};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct TitleResponse {
    title: String,
}

async fn draft_handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> SseResponse {
    SseResponse::from_chunks(state.drafts.run(request.messages))
}

async fn route_handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> SseResponse {
    SseResponse::from_chunks(state.router.run(request.messages))
}

async fn research_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, StatusCode> {
    let Some(research) = &state.research else {
        tracing::warn!("research requested but no search backend is configured");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    Ok(SseResponse::from_chunks(research.run(request.messages)))
}

// names the conversation after its first user message
async fn title_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<TitleResponse>, StatusCode> {
    let first = request
        .messages
        .iter()
        .find(|message| message.role == Role::User)
        .map(|message| message.text())
        .filter(|text| !text.trim().is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;

    match state.titles.generate(&first).await {
        Ok(title) => Ok(Json(TitleResponse { title })),
        Err(e) => {
            tracing::error!("Failed to generate title: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/workflow/draft", post(draft_handler))
        .route("/workflow/route", post(route_handler))
        .route("/workflow/research", post(research_handler))
        .route("/workflow/title", post(title_handler))
        .with_state(state)
}
