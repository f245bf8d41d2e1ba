use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::errors::AppError;
use crate::models::{ChatEvent, WsChatRequest};
use crate::service::ChatService;

/// GET `/ws/chat`: upgrades to a WebSocket for streaming chat.
pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    State(svc): State<ChatService>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, svc))
}

/// Handles a single WebSocket connection.
///
/// Protocol:
/// - Client sends `{ "type": "send", "message": "..." }` or `{ "type": "cancel" }`
/// - Server forwards every chat event:
///   `stream_start`, `stream_chunk` (repeated), `stream_end`, `annotated`,
///   or `error` on failure.
async fn handle_socket(socket: WebSocket, svc: ChatService) {
    info!("WebSocket client connected");

    let (sink, mut stream) = socket.split();
    let events = svc.subscribe();
    // Errors meant only for this client (malformed requests).
    let (direct_tx, direct_rx) = mpsc::channel::<ChatEvent>(16);
    let mut writer = tokio::spawn(forward_events(sink, events, direct_rx));

    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            _ = &mut writer => break,
        };
        let msg = match msg {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!("WebSocket receive error: {e}");
                break;
            }
            None => break,
        };

        let text = match &msg {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        match serde_json::from_str::<WsChatRequest>(&text) {
            Ok(WsChatRequest::Send { message }) => {
                let svc = svc.clone();
                let direct_tx = direct_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = svc.send(&message).await {
                        debug!("WebSocket send ended with error: {e}");
                        if let Some(event) = requester_error(&e) {
                            let _ = direct_tx.send(event).await;
                        }
                    }
                });
            }
            Ok(WsChatRequest::Cancel) => match svc.store().current_conversation_id().await {
                Some(id) => {
                    svc.cancel(&id);
                }
                None => debug!("Cancel ignored, no conversation selected"),
            },
            Err(e) => {
                let event = ChatEvent::Error {
                    conversation_id: None,
                    message_id: None,
                    message: format!("Invalid request: {e}"),
                };
                if direct_tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    }

    writer.abort();
    info!("WebSocket client disconnected");
}

/// Rejections of a send are returned to its caller and never broadcast, so
/// only the requesting socket hears about them. Later failures already went
/// out on the event stream with their conversation.
fn requester_error(err: &AppError) -> Option<ChatEvent> {
    err.is_validation().then(|| ChatEvent::Error {
        conversation_id: None,
        message_id: None,
        message: err.to_string(),
    })
}

/// Writes broadcast and direct events to the socket until either side closes.
async fn forward_events(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: broadcast::Receiver<ChatEvent>,
    mut direct: mpsc::Receiver<ChatEvent>,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagged, {skipped} event(s) dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(event) = direct.recv() => event,
        };

        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize chat event: {e}");
                continue;
            }
        };
        if sink.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_go_to_the_requester() {
        let event = requester_error(&AppError::EmptyField { field_name: "message".into() });
        assert!(matches!(
            event,
            Some(ChatEvent::Error { conversation_id: None, ref message, .. })
                if message == "Field 'message' cannot be empty"
        ));
    }

    #[test]
    fn broadcast_failures_are_not_repeated() {
        assert!(requester_error(&AppError::GenerationFailed { message: "x".into() }).is_none());
        assert!(requester_error(&AppError::Cancelled { message_id: "m".into() }).is_none());
    }
}
