pub mod api_routes;
pub mod ws_routes;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::ChatService;

use self::api_routes::{
    analyze_handler, cancel_handler, chat_handler, clear_conversations_handler,
    create_conversation_handler, current_conversation_handler, delete_conversation_handler,
    list_conversations_handler, list_messages_handler, rename_conversation_handler,
    select_conversation_handler,
};
use self::ws_routes::ws_chat_handler;

pub fn create_router(chat_service: ChatService) -> Router {
    Router::new()
        .route(
            "/api/conversations",
            get(list_conversations_handler)
                .post(create_conversation_handler)
                .delete(clear_conversations_handler),
        )
        .route("/api/conversations/current", get(current_conversation_handler))
        .route(
            "/api/conversations/{id}",
            patch(rename_conversation_handler).delete(delete_conversation_handler),
        )
        .route("/api/conversations/{id}/messages", get(list_messages_handler))
        .route("/api/conversations/{id}/select", post(select_conversation_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/cancel", post(cancel_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/ws/chat", get(ws_chat_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(chat_service)
}
