use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::errors::AppError;
use crate::models::{
    AnalyzeRequest, ChatRequest, ConversationList, CreateConversationRequest,
    RenameConversationRequest,
};
use crate::service::ChatService;

const DEFAULT_TITLE: &str = "Nueva conversación";

// ── Conversations ─────────────────────────────────────────────────────────────

/// GET `/api/conversations`
pub async fn list_conversations_handler(State(svc): State<ChatService>) -> impl IntoResponse {
    let conversations = svc.get_conversations().await;
    let current_conversation_id = svc.store().current_conversation_id().await;
    Json(ConversationList { conversations, current_conversation_id })
}

/// POST `/api/conversations`: creates and selects a conversation.
pub async fn create_conversation_handler(
    State(svc): State<ChatService>,
    body: Option<Json<CreateConversationRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let title = request
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    match svc.create_conversation(&title).await {
        Ok(conversation) => (StatusCode::CREATED, Json(conversation)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// DELETE `/api/conversations`
pub async fn clear_conversations_handler(State(svc): State<ChatService>) -> Response {
    match svc.clear_conversations().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET `/api/conversations/current`
pub async fn current_conversation_handler(State(svc): State<ChatService>) -> Response {
    match svc.store().get_current_conversation().await {
        Some(conversation) => Json(conversation).into_response(),
        None => error_body(StatusCode::NOT_FOUND, "No conversation is selected"),
    }
}

/// GET `/api/conversations/{id}/messages`
pub async fn list_messages_handler(
    Path(id): Path<String>,
    State(svc): State<ChatService>,
) -> Response {
    match svc.get_messages(&id).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => error_response(&e),
    }
}

/// PATCH `/api/conversations/{id}`
pub async fn rename_conversation_handler(
    Path(id): Path<String>,
    State(svc): State<ChatService>,
    Json(request): Json<RenameConversationRequest>,
) -> Response {
    let title = request.title.trim();
    if title.is_empty() {
        return error_response(&AppError::EmptyField { field_name: "title".to_string() });
    }
    match svc.rename_conversation(&id, title).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => error_response(&e),
    }
}

/// DELETE `/api/conversations/{id}`
pub async fn delete_conversation_handler(
    Path(id): Path<String>,
    State(svc): State<ChatService>,
) -> Response {
    match svc.delete_conversation(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(&AppError::ConversationNotFound { id }),
        Err(e) => error_response(&e),
    }
}

/// POST `/api/conversations/{id}/select`
pub async fn select_conversation_handler(
    Path(id): Path<String>,
    State(svc): State<ChatService>,
) -> Response {
    match svc.select_conversation(&id).await {
        Ok(()) => match svc.store().get_conversation(&id).await {
            Some(conversation) => Json(conversation).into_response(),
            None => error_response(&AppError::ConversationNotFound { id }),
        },
        Err(e) => error_response(&e),
    }
}

// ── Chat ──────────────────────────────────────────────────────────────────────

/// POST `/api/chat`: runs a full send and returns both messages.
pub async fn chat_handler(
    State(svc): State<ChatService>,
    Json(request): Json<ChatRequest>,
) -> Response {
    match svc.send(&request.message).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/api/chat/cancel`: cancels replies streaming in the selected conversation.
pub async fn cancel_handler(State(svc): State<ChatService>) -> Response {
    match svc.store().current_conversation_id().await {
        Some(id) => {
            let cancelled = svc.cancel(&id);
            Json(json!({ "conversation_id": id, "cancelled": cancelled })).into_response()
        }
        None => error_response(&AppError::NoConversationSelected),
    }
}

/// POST `/api/analyze`
pub async fn analyze_handler(
    State(svc): State<ChatService>,
    Json(request): Json<AnalyzeRequest>,
) -> Response {
    match svc.analyze_text(&request.text).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Helper ────────────────────────────────────────────────────────────────────

pub(crate) fn status_for(err: &AppError) -> StatusCode {
    if err.is_validation() || matches!(err, AppError::SentimentFailed { .. }) {
        StatusCode::BAD_REQUEST
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_agent_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else if err.is_cancelled() {
        StatusCode::CONFLICT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn error_response(err: &AppError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        error!("Request failed: {err}");
    } else {
        warn!("Request rejected: {err}");
    }
    error_body(status, &err.to_string())
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
