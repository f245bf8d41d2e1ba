//! Chat orchestration: one send-transaction spans the store, the response
//! generator and the sentiment analyzer.
//!
//! The placeholder assistant message is addressed through the
//! [`PlaceholderHandle`] created with it, never by position, so overlapping
//! sends in one conversation each finalize their own reply.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::ResponseGenerator;
use crate::errors::AppError;
use crate::models::{
    AnalysisResult, ChatEvent, ChatResponse, ChatTurn, Conversation, Message, MessagePatch,
    MessageStatus, NewMessage,
};
use crate::sentiment::{text, SentimentAnalyzer};
use crate::service::SendPhase;
use crate::store::ConversationStore;

const DEFAULT_MAX_MESSAGE_LENGTH: usize = 8000;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub max_message_length: usize,
    /// Cancel in-flight replies of a conversation when another one is selected.
    pub cancel_on_switch: bool,
    pub chunk_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { max_message_length: DEFAULT_MAX_MESSAGE_LENGTH, cancel_on_switch: true, chunk_buffer: 64 }
    }
}

/// Addresses the assistant placeholder of one send-transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderHandle {
    pub conversation_id: String,
    pub message_id: String,
}

/// Transient state of a transaction that has a placeholder.
struct InFlight {
    conversation_id: String,
    phase: SendPhase,
    text: String,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<ConversationStore>,
    generator: Arc<dyn ResponseGenerator>,
    analyzer: Arc<dyn SentimentAnalyzer>,
    config: ChatConfig,
    events: broadcast::Sender<ChatEvent>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl ChatService {
    pub fn new(
        store: Arc<ConversationStore>,
        generator: Arc<dyn ResponseGenerator>,
        analyzer: Arc<dyn SentimentAnalyzer>,
        config: ChatConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            generator,
            analyzer,
            config,
            events,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Receives every [`ChatEvent`] published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    // ── Conversation management ──────────────────────────────────────────────

    pub async fn get_conversations(&self) -> Vec<Conversation> {
        self.store.list_conversations().await
    }

    pub async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>, AppError> {
        self.store
            .get_conversation(conversation_id)
            .await
            .map(|c| c.messages)
            .ok_or_else(|| AppError::ConversationNotFound { id: conversation_id.to_string() })
    }

    pub async fn create_conversation(&self, title: &str) -> Result<Conversation, AppError> {
        let previous = self.store.current_conversation_id().await;
        let created = self.store.create_conversation(title).await?;
        if let Some(previous) = previous {
            self.cancel_after_switch(&previous);
        }
        Ok(created)
    }

    /// Selects `id`, cancelling replies still streaming in the previously
    /// selected conversation when configured to.
    pub async fn select_conversation(&self, id: &str) -> Result<(), AppError> {
        let previous = self.store.current_conversation_id().await;
        self.store.set_current_conversation(id).await?;
        if let Some(previous) = previous.filter(|p| p != id) {
            self.cancel_after_switch(&previous);
        }
        Ok(())
    }

    pub async fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation, AppError> {
        self.store.rename_conversation(id, title).await
    }

    /// Cancels the conversation's in-flight replies, then deletes it.
    pub async fn delete_conversation(&self, id: &str) -> Result<bool, AppError> {
        self.cancel(id);
        self.store.delete_conversation(id).await
    }

    pub async fn clear_conversations(&self) -> Result<(), AppError> {
        let tokens: Vec<CancellationToken> = self
            .lock_in_flight()
            .values()
            .map(|f| f.cancel.clone())
            .collect();
        tokens.iter().for_each(CancellationToken::cancel);
        self.store.clear_conversations().await
    }

    // ── Streaming state ──────────────────────────────────────────────────────

    /// Text accumulated so far for a placeholder that is still streaming.
    pub fn in_flight_text(&self, message_id: &str) -> Option<String> {
        self.lock_in_flight()
            .get(message_id)
            .filter(|f| f.phase == SendPhase::Streaming)
            .map(|f| f.text.clone())
    }

    pub fn phase_of(&self, message_id: &str) -> SendPhase {
        self.lock_in_flight().get(message_id).map(|f| f.phase).unwrap_or(SendPhase::Idle)
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.lock_in_flight()
            .values()
            .any(|f| f.conversation_id == conversation_id && f.phase == SendPhase::Streaming)
    }

    /// Cancels every reply of `conversation_id` that has not finished
    /// generating. Returns how many were signalled.
    pub fn cancel(&self, conversation_id: &str) -> usize {
        let guard = self.lock_in_flight();
        let mut cancelled = 0;
        for flight in guard.values() {
            if flight.conversation_id == conversation_id
                && matches!(flight.phase, SendPhase::Sending | SendPhase::Streaming)
            {
                flight.cancel.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!("Cancelling {cancelled} in-flight reply(ies) in conversation {conversation_id}");
        }
        cancelled
    }

    fn cancel_after_switch(&self, previous: &str) {
        if self.config.cancel_on_switch {
            self.cancel(previous);
        }
    }

    // ── Send transaction ─────────────────────────────────────────────────────

    /// Sends `content` to the selected conversation and drives the reply to
    /// completion.
    ///
    /// The user message is kept whatever happens afterwards. A reply that
    /// fails or is cancelled leaves its placeholder marked failed. A failed
    /// sentiment analysis only drops the sentiment.
    ///
    /// The transaction runs in its own task, so a caller that goes away
    /// mid-reply does not strand the placeholder.
    pub async fn send(&self, content: &str) -> Result<ChatResponse, AppError> {
        let svc = self.clone();
        let content = content.to_string();
        tokio::spawn(async move { svc.run_send(&content).await })
            .await
            .map_err(|e| {
                error!("Send task failed to complete: {e}");
                AppError::Unexpected("send task terminated unexpectedly".to_string())
            })?
    }

    async fn run_send(&self, content: &str) -> Result<ChatResponse, AppError> {
        let mut phase = SendPhase::Idle;

        // Rejections go back to the caller only; nothing was touched yet.
        let conversation_id = self
            .guard(content)
            .await
            .inspect_err(|e| warn!("Send rejected: {e}"))?;
        phase = phase.advance(SendPhase::Sending)?;

        let (user_message, handle, history) = match self.open(&conversation_id, content).await {
            Ok(opened) => opened,
            Err(e) => {
                return_to_idle(phase);
                error!("Failed to open send in conversation {conversation_id}: {e}");
                self.emit_error(Some(&conversation_id), None, &e);
                return Err(e);
            }
        };

        phase = phase.advance(SendPhase::Streaming)?;
        self.set_phase(&handle, phase);
        self.emit(ChatEvent::StreamStart {
            conversation_id: handle.conversation_id.clone(),
            message_id: handle.message_id.clone(),
        });

        let full_text = match self.stream(&handle, history).await {
            Ok(t) => t,
            Err(e) => return Err(self.abort(&handle, phase, e).await),
        };

        phase = phase.advance(SendPhase::Finalizing)?;
        self.set_phase(&handle, phase);
        let finalized = match self.finalize(&handle, &full_text).await {
            Ok(m) => m,
            Err(e) => return Err(self.abort(&handle, phase, e).await),
        };

        phase = phase.advance(SendPhase::Annotating)?;
        self.set_phase(&handle, phase);
        let assistant_message = self.annotate(&handle, finalized, &full_text).await;

        phase.advance(SendPhase::Idle)?;
        self.lock_in_flight().remove(&handle.message_id);
        info!(
            "Reply {} finalized in conversation {} ({} chars)",
            handle.message_id,
            handle.conversation_id,
            full_text.len()
        );

        Ok(ChatResponse { conversation_id: handle.conversation_id, user_message, assistant_message })
    }

    /// Rejects blank or oversized content and a missing selection. Returns
    /// the selected conversation id.
    async fn guard(&self, content: &str) -> Result<String, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        let length = content.chars().count();
        if length > self.config.max_message_length {
            return Err(AppError::FieldTooLong {
                field_name: "message".to_string(),
                max_length: self.config.max_message_length,
                actual_length: length,
            });
        }
        self.store
            .get_current_conversation()
            .await
            .map(|c| c.id)
            .ok_or(AppError::NoConversationSelected)
    }

    /// Appends the user message and the placeholder, registers the
    /// transaction, and collects the history the generator will see: every
    /// completed message up to and including this user message.
    async fn open(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(Message, PlaceholderHandle, Vec<ChatTurn>), AppError> {
        let user_message = self.store.add_message(conversation_id, NewMessage::user(content)).await?;
        let placeholder = self.store.add_message(conversation_id, NewMessage::placeholder()).await?;
        let handle = PlaceholderHandle {
            conversation_id: conversation_id.to_string(),
            message_id: placeholder.id,
        };

        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await
            .ok_or_else(|| AppError::ConversationNotFound { id: conversation_id.to_string() })?;
        let cutoff = conversation
            .messages
            .iter()
            .position(|m| m.id == user_message.id)
            .map_or(conversation.messages.len(), |i| i + 1);
        let history = conversation.messages[..cutoff]
            .iter()
            .filter(|m| m.status == MessageStatus::Complete)
            .map(ChatTurn::from)
            .collect();

        self.lock_in_flight().insert(
            handle.message_id.clone(),
            InFlight {
                conversation_id: conversation_id.to_string(),
                phase: SendPhase::Sending,
                text: String::new(),
                cancel: CancellationToken::new(),
            },
        );

        debug!("Opened reply {} in conversation {conversation_id}", handle.message_id);
        Ok((user_message, handle, history))
    }

    /// Runs the generator in its own task and republishes the accumulated
    /// text after every fragment. Nothing here touches the store.
    async fn stream(
        &self,
        handle: &PlaceholderHandle,
        history: Vec<ChatTurn>,
    ) -> Result<String, AppError> {
        let cancel = self
            .lock_in_flight()
            .get(&handle.message_id)
            .map(|f| f.cancel.clone())
            .unwrap_or_default();
        let cancelled = || AppError::Cancelled { message_id: handle.message_id.clone() };

        let (tx, mut rx) = mpsc::channel::<String>(self.config.chunk_buffer.max(1));
        let generator = Arc::clone(&self.generator);
        let mut task = tokio::spawn(async move { generator.generate(history, Some(tx)).await });

        let mut accumulated = String::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    task.abort();
                    return Err(cancelled());
                }
                chunk = rx.recv() => match chunk {
                    Some(delta) => {
                        accumulated.push_str(&delta);
                        self.publish_chunk(handle, delta, &accumulated);
                    }
                    None => break,
                },
            }
        }

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                task.abort();
                return Err(cancelled());
            }
            joined = &mut task => joined,
        };

        match joined {
            Ok(result) => result,
            Err(e) => {
                error!("Generation task for {} failed to complete: {e}", handle.message_id);
                Err(AppError::GenerationFailed {
                    message: "generation task terminated unexpectedly".to_string(),
                })
            }
        }
    }

    fn publish_chunk(&self, handle: &PlaceholderHandle, delta: String, accumulated: &str) {
        if let Some(flight) = self.lock_in_flight().get_mut(&handle.message_id) {
            flight.text = accumulated.to_string();
        }
        self.emit(ChatEvent::StreamChunk {
            conversation_id: handle.conversation_id.clone(),
            message_id: handle.message_id.clone(),
            delta,
            accumulated: accumulated.to_string(),
        });
    }

    /// Writes the final text into the placeholder and drops the accumulator.
    async fn finalize(&self, handle: &PlaceholderHandle, full_text: &str) -> Result<Message, AppError> {
        let message = self
            .store
            .update_message(&handle.conversation_id, &handle.message_id, MessagePatch::finalized(full_text))
            .await?;
        if let Some(flight) = self.lock_in_flight().get_mut(&handle.message_id) {
            flight.text.clear();
        }
        self.emit(ChatEvent::StreamEnd {
            conversation_id: handle.conversation_id.clone(),
            message_id: handle.message_id.clone(),
            full_content: full_text.to_string(),
        });
        Ok(message)
    }

    /// Attaches sentiment to an already finalized reply. Never fails: any
    /// problem leaves the finalized message as it is.
    async fn annotate(&self, handle: &PlaceholderHandle, finalized: Message, full_text: &str) -> Message {
        let patch = match self.analyzer.analyze(full_text).await {
            Ok(sentiment) => MessagePatch::content(full_text).with_sentiment(sentiment),
            Err(e) => {
                warn!("Sentiment analysis failed for {}, keeping reply without it: {e}", handle.message_id);
                MessagePatch::content(full_text)
            }
        };

        let annotated = match self
            .store
            .update_message(&handle.conversation_id, &handle.message_id, patch)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                warn!("Could not store annotation for {}: {e}", handle.message_id);
                finalized
            }
        };

        self.emit(ChatEvent::Annotated {
            conversation_id: handle.conversation_id.clone(),
            message_id: handle.message_id.clone(),
            sentiment: annotated.sentiment.clone(),
        });
        annotated
    }

    /// Marks the placeholder failed, forgets the transaction and reports
    /// `err`, which is handed back to the caller.
    async fn abort(&self, handle: &PlaceholderHandle, phase: SendPhase, err: AppError) -> AppError {
        return_to_idle(phase);
        self.lock_in_flight().remove(&handle.message_id);

        let reason = if err.is_cancelled() { "generation cancelled".to_string() } else { err.to_string() };
        if err.is_cancelled() {
            info!("Reply {} cancelled", handle.message_id);
        } else {
            error!("Reply {} failed: {err}", handle.message_id);
        }

        if let Err(e) = self
            .store
            .update_message(&handle.conversation_id, &handle.message_id, MessagePatch::failed(reason))
            .await
        {
            warn!("Could not mark placeholder {} as failed: {e}", handle.message_id);
        }

        self.emit_error(Some(&handle.conversation_id), Some(&handle.message_id), &err);
        err
    }

    // ── Analysis ─────────────────────────────────────────────────────────────

    /// Sentiment plus topics, summary and key phrases of arbitrary text.
    pub async fn analyze_text(&self, input: &str) -> Result<AnalysisResult, AppError> {
        let sentiment = self.analyzer.analyze(input).await?;
        Ok(AnalysisResult {
            sentiment,
            topics: text::extract_topics(input),
            summary: text::summarize(input),
            key_phrases: text::extract_key_phrases(input),
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn set_phase(&self, handle: &PlaceholderHandle, phase: SendPhase) {
        if let Some(flight) = self.lock_in_flight().get_mut(&handle.message_id) {
            flight.phase = phase;
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, InFlight>> {
        // The map holds no invariants a panicking holder could break.
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_error(&self, conversation_id: Option<&str>, message_id: Option<&str>, err: &AppError) {
        self.emit(ChatEvent::Error {
            conversation_id: conversation_id.map(str::to_string),
            message_id: message_id.map(str::to_string),
            message: err.to_string(),
        });
    }
}

fn return_to_idle(phase: SendPhase) {
    if let Err(e) = phase.advance(SendPhase::Idle) {
        error!("Send left {phase:?} without a valid exit: {e}");
    }
}
