//! Conversation store: the single source of truth for conversations, their
//! messages, and the current selection.
//!
//! Every mutation runs against a copy of the state, is persisted through the
//! injected [`StateStorage`], and only then replaces the live state. Readers
//! never observe a half-applied mutation, and the live state always matches
//! the last record written.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::{
    Conversation, Message, MessagePatch, MessageRole, MessageStatus, NewMessage, PersistedState,
};
use crate::storage::StateStorage;

const INTERRUPTED_REASON: &str = "interrupted";

pub struct ConversationStore {
    state: RwLock<PersistedState>,
    storage: Arc<dyn StateStorage>,
}

impl ConversationStore {
    /// Reads the persisted record once; a missing record yields an empty store.
    pub async fn hydrate(storage: Arc<dyn StateStorage>) -> Result<Self, AppError> {
        let mut state = storage.load().await?.unwrap_or_default();
        if repair_selection(&mut state) {
            warn!("Persisted selection referenced a missing conversation, reassigned");
        }
        let interrupted = fail_interrupted(&mut state);
        if interrupted > 0 {
            warn!("Marked {interrupted} interrupted placeholder(s) as failed");
            storage.save(&state).await?;
        }
        info!(
            "Conversation store hydrated with {} conversation(s)",
            state.conversations.len()
        );
        Ok(Self { state: RwLock::new(state), storage })
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub async fn list_conversations(&self) -> Vec<Conversation> {
        self.state.read().await.conversations.clone()
    }

    pub async fn get_conversation(&self, id: &str) -> Option<Conversation> {
        self.state.read().await.conversations.iter().find(|c| c.id == id).cloned()
    }

    pub async fn current_conversation_id(&self) -> Option<String> {
        self.state.read().await.current_conversation_id.clone()
    }

    pub async fn get_current_conversation(&self) -> Option<Conversation> {
        let state = self.state.read().await;
        let id = state.current_conversation_id.as_deref()?;
        state.conversations.iter().find(|c| c.id == id).cloned()
    }

    pub async fn snapshot(&self) -> PersistedState {
        self.state.read().await.clone()
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Creates an empty conversation and selects it.
    pub async fn create_conversation(&self, title: &str) -> Result<Conversation, AppError> {
        let created = self
            .mutate(|state| {
                let mut conversation = Conversation::new(title.to_string());
                while state.conversations.iter().any(|c| c.id == conversation.id) {
                    conversation.id = uuid::Uuid::new_v4().to_string();
                }
                state.current_conversation_id = Some(conversation.id.clone());
                state.conversations.push(conversation.clone());
                Ok(conversation)
            })
            .await?;
        info!("Created conversation {} ({:?})", created.id, created.title);
        Ok(created)
    }

    /// Removes the conversation and all of its messages. Returns `false` when
    /// no such conversation exists.
    pub async fn delete_conversation(&self, id: &str) -> Result<bool, AppError> {
        let removed = self
            .mutate(|state| {
                let before = state.conversations.len();
                state.conversations.retain(|c| c.id != id);
                if state.conversations.len() == before {
                    return Ok(false);
                }
                if state.current_conversation_id.as_deref() == Some(id) {
                    state.current_conversation_id =
                        state.conversations.first().map(|c| c.id.clone());
                }
                Ok(true)
            })
            .await?;
        if removed {
            info!("Deleted conversation {id}");
        } else {
            debug!("Delete ignored, conversation {id} does not exist");
        }
        Ok(removed)
    }

    /// Selects an existing conversation.
    pub async fn set_current_conversation(&self, id: &str) -> Result<(), AppError> {
        self.mutate(|state| {
            if !state.conversations.iter().any(|c| c.id == id) {
                return Err(AppError::ConversationNotFound { id: id.to_string() });
            }
            state.current_conversation_id = Some(id.to_string());
            Ok(())
        })
        .await
    }

    pub async fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation, AppError> {
        self.mutate(|state| {
            let conversation = find_mut(state, id)?;
            conversation.title = title.to_string();
            conversation.touch();
            Ok(conversation.clone())
        })
        .await
    }

    /// Appends a message with a fresh id and a timestamp no earlier than the
    /// previous message's.
    pub async fn add_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<Message, AppError> {
        let added = self
            .mutate(|state| {
                let conversation = find_mut(state, conversation_id)?;
                let mut id = uuid::Uuid::new_v4().to_string();
                while conversation.find_message(&id).is_some() {
                    id = uuid::Uuid::new_v4().to_string();
                }
                let floor = conversation
                    .messages
                    .last()
                    .map(|m| m.timestamp)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let message = Message {
                    id,
                    role: message.role,
                    content: message.content,
                    timestamp: Utc::now().max(floor),
                    status: message.status,
                    error: None,
                    sentiment: None,
                };
                conversation.messages.push(message.clone());
                conversation.touch();
                Ok(message)
            })
            .await?;
        debug!("Appended {} message {} to {conversation_id}", added.role, added.id);
        Ok(added)
    }

    /// Merges `patch` into an existing message in place.
    ///
    /// Sentiment may only land on a completed assistant message.
    pub async fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        patch: MessagePatch,
    ) -> Result<Message, AppError> {
        self.mutate(|state| {
            let conversation = find_mut(state, conversation_id)?;
            let message = conversation
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| AppError::MessageNotFound {
                    conversation_id: conversation_id.to_string(),
                    message_id: message_id.to_string(),
                })?;

            let attaches_sentiment = patch.sentiment.is_some();
            let mut updated = message.clone();
            patch.apply(&mut updated);
            if attaches_sentiment {
                if updated.role != MessageRole::Assistant {
                    return Err(AppError::InvalidPatch {
                        reason: "sentiment is only attached to assistant messages".to_string(),
                    });
                }
                if updated.status != MessageStatus::Complete {
                    return Err(AppError::InvalidPatch {
                        reason: format!("message {message_id} is not finalized"),
                    });
                }
            }

            *message = updated.clone();
            conversation.touch();
            Ok(updated)
        })
        .await
    }

    /// Drops every conversation and clears the selection.
    pub async fn clear_conversations(&self) -> Result<(), AppError> {
        self.mutate(|state| {
            state.conversations.clear();
            state.current_conversation_id = None;
            Ok(())
        })
        .await?;
        info!("Cleared all conversations");
        Ok(())
    }

    /// Applies `op` to a copy of the state, persists the copy, then commits.
    /// A copy identical to the live state is neither saved nor committed.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut PersistedState) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut live = self.state.write().await;
        let mut next = live.clone();
        let out = op(&mut next)?;
        if next != *live {
            self.storage.save(&next).await?;
            *live = next;
        }
        Ok(out)
    }
}

fn find_mut<'a>(state: &'a mut PersistedState, id: &str) -> Result<&'a mut Conversation, AppError> {
    state
        .conversations
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or_else(|| AppError::ConversationNotFound { id: id.to_string() })
}

/// Points a dangling selection at the first conversation (or none).
/// Returns whether anything changed.
fn repair_selection(state: &mut PersistedState) -> bool {
    let dangling = match state.current_conversation_id.as_deref() {
        Some(id) => !state.conversations.iter().any(|c| c.id == id),
        None => false,
    };
    if dangling {
        state.current_conversation_id = state.conversations.first().map(|c| c.id.clone());
    }
    dangling
}

/// Fails placeholders left pending by a process that stopped mid-reply.
fn fail_interrupted(state: &mut PersistedState) -> usize {
    let mut repaired = 0;
    for message in state
        .conversations
        .iter_mut()
        .flat_map(|c| c.messages.iter_mut())
        .filter(|m| m.status == MessageStatus::Pending)
    {
        MessagePatch::failed(INTERRUPTED_REASON).apply(message);
        repaired += 1;
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SentimentAnalysis;
    use crate::storage::InMemoryStorage;
    use std::collections::HashSet;

    async fn new_store() -> (ConversationStore, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        let store = ConversationStore::hydrate(storage.clone()).await.unwrap();
        (store, storage)
    }

    #[tokio::test]
    async fn create_selects_new_empty_conversation() {
        let (store, storage) = new_store().await;
        let conv = store.create_conversation("Demo").await.unwrap();

        assert!(conv.messages.is_empty());
        assert_eq!(conv.title, "Demo");
        assert_eq!(store.current_conversation_id().await, Some(conv.id.clone()));
        assert!(conv.updated_at >= conv.created_at);
        assert_eq!(storage.save_count(), 1);
    }

    #[tokio::test]
    async fn messages_keep_call_order_and_non_decreasing_timestamps() {
        let (store, _) = new_store().await;
        let conv = store.create_conversation("Order").await.unwrap();

        for i in 0..20 {
            let msg = if i % 2 == 0 {
                NewMessage::user(format!("msg {i}"))
            } else {
                NewMessage::assistant(format!("msg {i}"))
            };
            store.add_message(&conv.id, msg).await.unwrap();
        }

        let conv = store.get_conversation(&conv.id).await.unwrap();
        let contents: Vec<_> = conv.messages.iter().map(|m| m.content.clone()).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("msg {i}")).collect();
        assert_eq!(contents, expected);
        assert!(conv.messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(conv.updated_at >= conv.created_at);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let (store, _) = new_store().await;
        let mut conv_ids = HashSet::new();
        for i in 0..10 {
            let conv = store.create_conversation(&format!("c{i}")).await.unwrap();
            assert!(conv_ids.insert(conv.id));
        }

        let target = store.current_conversation_id().await.unwrap();
        let mut msg_ids = HashSet::new();
        for _ in 0..25 {
            let m = store.add_message(&target, NewMessage::user("x")).await.unwrap();
            assert!(msg_ids.insert(m.id));
        }
    }

    #[tokio::test]
    async fn deleting_selected_falls_back_to_remaining() {
        let (store, _) = new_store().await;
        let a = store.create_conversation("a").await.unwrap();
        let b = store.create_conversation("b").await.unwrap();
        let c = store.create_conversation("c").await.unwrap();
        assert_eq!(store.current_conversation_id().await.as_deref(), Some(c.id.as_str()));

        assert!(store.delete_conversation(&c.id).await.unwrap());
        let current = store.current_conversation_id().await.unwrap();
        assert!(current == a.id || current == b.id);
        assert_eq!(current, a.id);
    }

    #[tokio::test]
    async fn deleting_unselected_keeps_selection() {
        let (store, _) = new_store().await;
        let a = store.create_conversation("a").await.unwrap();
        let b = store.create_conversation("b").await.unwrap();

        store.delete_conversation(&a.id).await.unwrap();
        assert_eq!(store.current_conversation_id().await, Some(b.id));
    }

    #[tokio::test]
    async fn deleting_only_conversation_clears_selection() {
        let (store, _) = new_store().await;
        let only = store.create_conversation("only").await.unwrap();
        store.add_message(&only.id, NewMessage::user("hi")).await.unwrap();

        store.delete_conversation(&only.id).await.unwrap();
        assert!(store.list_conversations().await.is_empty());
        assert!(store.get_current_conversation().await.is_none());
        assert!(store.current_conversation_id().await.is_none());
    }

    #[tokio::test]
    async fn deleting_unknown_is_a_noop() {
        let (store, storage) = new_store().await;
        store.create_conversation("a").await.unwrap();
        let saves = storage.save_count();

        assert!(!store.delete_conversation("nope").await.unwrap());
        assert_eq!(store.list_conversations().await.len(), 1);
        assert_eq!(storage.save_count(), saves);
    }

    #[tokio::test]
    async fn unknown_ids_are_errors() {
        let (store, _) = new_store().await;
        let conv = store.create_conversation("a").await.unwrap();

        let err = store.add_message("nope", NewMessage::user("x")).await.unwrap_err();
        assert!(matches!(err, AppError::ConversationNotFound { .. }));

        let err = store
            .update_message(&conv.id, "nope", MessagePatch::content("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MessageNotFound { .. }));

        let err = store.set_current_conversation("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.current_conversation_id().await, Some(conv.id));
    }

    #[tokio::test]
    async fn update_merges_in_place_and_bumps_updated_at() {
        let (store, _) = new_store().await;
        let conv = store.create_conversation("a").await.unwrap();
        let user = store.add_message(&conv.id, NewMessage::user("hola")).await.unwrap();
        let placeholder = store.add_message(&conv.id, NewMessage::placeholder()).await.unwrap();
        let before = store.get_conversation(&conv.id).await.unwrap().updated_at;

        let updated = store
            .update_message(&conv.id, &placeholder.id, MessagePatch::finalized("Hello!"))
            .await
            .unwrap();
        assert_eq!(updated.content, "Hello!");
        assert_eq!(updated.timestamp, placeholder.timestamp);

        let conv = store.get_conversation(&conv.id).await.unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0], user);
        assert_eq!(conv.messages[1].status, MessageStatus::Complete);
        assert!(conv.updated_at >= before);
    }

    #[tokio::test]
    async fn sentiment_rejected_on_pending_or_user_message() {
        let (store, _) = new_store().await;
        let conv = store.create_conversation("a").await.unwrap();
        let user = store.add_message(&conv.id, NewMessage::user("hola")).await.unwrap();
        let placeholder = store.add_message(&conv.id, NewMessage::placeholder()).await.unwrap();
        let sentiment = SentimentAnalysis::from_score(0.5, 0.1);

        let err = store
            .update_message(
                &conv.id,
                &placeholder.id,
                MessagePatch::content("partial").with_sentiment(sentiment.clone()),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = store
            .update_message(&conv.id, &user.id, MessagePatch::default().with_sentiment(sentiment.clone()))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        // Finalizing in the same patch is allowed.
        let ok = store
            .update_message(
                &conv.id,
                &placeholder.id,
                MessagePatch::finalized("done").with_sentiment(sentiment),
            )
            .await
            .unwrap();
        assert!(ok.sentiment.is_some());

        let stored = store.get_conversation(&conv.id).await.unwrap();
        assert_eq!(stored.messages[1].content, "done");
    }

    #[tokio::test]
    async fn clear_empties_store_and_selection() {
        let (store, storage) = new_store().await;
        store.create_conversation("a").await.unwrap();
        store.create_conversation("b").await.unwrap();

        store.clear_conversations().await.unwrap();
        assert!(store.list_conversations().await.is_empty());
        assert!(store.current_conversation_id().await.is_none());
        assert_eq!(storage.snapshot(), Some(PersistedState::default()));
    }

    #[tokio::test]
    async fn rename_changes_title() {
        let (store, _) = new_store().await;
        let conv = store.create_conversation("old").await.unwrap();
        let renamed = store.rename_conversation(&conv.id, "new").await.unwrap();
        assert_eq!(renamed.title, "new");
        assert_eq!(renamed.created_at, conv.created_at);
        assert!(store.rename_conversation("nope", "x").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn failed_save_leaves_state_untouched() {
        let (store, storage) = new_store().await;
        let conv = store.create_conversation("a").await.unwrap();

        storage.set_fail_saves(true);
        assert!(store.add_message(&conv.id, NewMessage::user("lost")).await.is_err());
        assert!(store.create_conversation("b").await.is_err());

        let state = store.snapshot().await;
        assert_eq!(state.conversations.len(), 1);
        assert!(state.conversations[0].messages.is_empty());
        assert_eq!(state.current_conversation_id, Some(conv.id));
    }

    #[tokio::test]
    async fn hydrate_restores_every_field() {
        let storage = Arc::new(InMemoryStorage::new());
        let original = {
            let store = ConversationStore::hydrate(storage.clone()).await.unwrap();
            let conv = store.create_conversation("persisted").await.unwrap();
            store.add_message(&conv.id, NewMessage::user("hola")).await.unwrap();
            let p = store.add_message(&conv.id, NewMessage::placeholder()).await.unwrap();
            store
                .update_message(
                    &conv.id,
                    &p.id,
                    MessagePatch::finalized("Hello!")
                        .with_sentiment(SentimentAnalysis::from_score(0.5, 0.25)),
                )
                .await
                .unwrap();
            store.snapshot().await
        };

        let reloaded = ConversationStore::hydrate(storage).await.unwrap();
        assert_eq!(reloaded.snapshot().await, original);
    }

    #[tokio::test]
    async fn hydrate_repairs_dangling_selection() {
        let conv = Conversation::new("kept".into());
        let storage = Arc::new(InMemoryStorage::with_state(PersistedState {
            conversations: vec![conv.clone()],
            current_conversation_id: Some("gone".into()),
        }));
        let store = ConversationStore::hydrate(storage).await.unwrap();
        assert_eq!(store.current_conversation_id().await, Some(conv.id));
    }

    #[tokio::test]
    async fn hydrate_fails_placeholders_left_pending() {
        let storage = Arc::new(InMemoryStorage::new());
        let (conv_id, placeholder_id) = {
            let store = ConversationStore::hydrate(storage.clone()).await.unwrap();
            let conv = store.create_conversation("crashed").await.unwrap();
            store.add_message(&conv.id, NewMessage::user("hola")).await.unwrap();
            let p = store.add_message(&conv.id, NewMessage::placeholder()).await.unwrap();
            (conv.id, p.id)
        };
        let saves_before = storage.save_count();

        let store = ConversationStore::hydrate(storage.clone()).await.unwrap();

        let conv = store.get_conversation(&conv_id).await.unwrap();
        let placeholder = conv.find_message(&placeholder_id).unwrap();
        assert_eq!(placeholder.status, MessageStatus::Failed);
        assert_eq!(placeholder.error.as_deref(), Some("interrupted"));
        assert_eq!(conv.messages[0].status, MessageStatus::Complete);
        assert_eq!(storage.save_count(), saves_before + 1);
        assert_eq!(storage.snapshot(), Some(store.snapshot().await));
    }
}
