use axum::{
    extract::{ Query, State },
    response::sse::{ Event, KeepAlive, Sse },
    routing::{ get, post },
    Json,
    Router,
};
use futures::stream::{ Stream, StreamExt };
use log::{ error, info };
use serde_json::{ json, Value };
use std::convert::Infallible;
use tower_http::cors::{ Any, CorsLayer };

use super::error::ApiError;
use crate::agent::ChatAgent;
use crate::models::api::{
    ChatReply,
    ChatRequest,
    ClearHistoryRequest,
    ClearHistoryResponse,
    HistoryQuery,
    HistoryResponse,
};
use crate::models::events::ChatEvent;

#[derive(Clone)]
struct AppState {
    agent: ChatAgent,
}

pub fn router(agent: ChatAgent) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/chat", get(stream_chat_handler).post(chat_handler))
        .route("/api/history", get(history_handler))
        .route("/api/history/clear", post(clear_history_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(AppState { agent })
}

fn require(value: Option<&str>, name: &str) -> Result<String, ApiError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::BadRequest(format!("{} is required", name))),
    }
}

fn sse_event(event: &ChatEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(data) => Event::default().data(data),
        Err(e) => {
            error!("Failed to encode chat event: {}", e);
            Event::default().data(r#"{"type":"error","error":"encoding failure"}"#)
        }
    }
}

async fn stream_chat_handler(
    State(state): State<AppState>,
    Query(request): Query<ChatRequest>
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    require(Some(&request.message), "message")?;
    info!(
        "Streaming chat request (session: {:?}, reasoning: {})",
        request.session_id,
        request.enable_reasoning
    );
    let events = state.agent
        .stream_chat(request)
        .map(|event| Ok::<Event, Infallible>(sse_event(&event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>
) -> Result<Json<ChatReply>, ApiError> {
    require(Some(&request.message), "message")?;
    let reply = state.agent.chat(request).await?;
    Ok(Json(reply))
}

async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>
) -> Result<Json<HistoryResponse>, ApiError> {
    let session_id = require(query.session_id.as_deref(), "sessionId")?;
    let messages = state.agent.history(&session_id).await?;
    Ok(Json(HistoryResponse { success: true, session_id, messages }))
}

async fn clear_history_handler(
    State(state): State<AppState>,
    Json(request): Json<ClearHistoryRequest>
) -> Result<Json<ClearHistoryResponse>, ApiError> {
    let session_id = require(request.session_id.as_deref(), "sessionId")?;
    let session_id = state.agent.clear(&session_id).await?;
    Ok(Json(ClearHistoryResponse { success: true, session_id }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
