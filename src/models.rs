use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the single persisted state record.
pub const STATE_RECORD_NAME: &str = "ai-conversations";

/// Sentiment scores strictly above this are `positive`, strictly below its
/// negation are `negative`.
pub const SENTIMENT_LABEL_THRESHOLD: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn find_message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// Bumps `updated_at`, never moving it behind `created_at`.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.created_at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a message's content.
///
/// User messages are `Complete` from the start. An assistant placeholder is
/// `Pending` while its reply streams, then either `Complete` or `Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    #[default]
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<SentimentAnalysis>,
}

/// Fields supplied by the caller of `add_message`; id and timestamp are
/// generated by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into(), status: MessageStatus::Complete }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            status: MessageStatus::Complete,
        }
    }

    /// Empty assistant message awaiting a streamed reply.
    pub fn placeholder() -> Self {
        Self { role: MessageRole::Assistant, content: String::new(), status: MessageStatus::Pending }
    }
}

/// Partial update merged into an existing message. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub status: Option<MessageStatus>,
    pub error: Option<String>,
    pub sentiment: Option<SentimentAnalysis>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), ..Self::default() }
    }

    /// Final content of a completed reply.
    pub fn finalized(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            status: Some(MessageStatus::Complete),
            ..Self::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(MessageStatus::Failed),
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_sentiment(mut self, sentiment: SentimentAnalysis) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub(crate) fn apply(self, message: &mut Message) {
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(status) = self.status {
            message.status = status;
        }
        if let Some(error) = self.error {
            message.error = Some(error);
        }
        if let Some(sentiment) = self.sentiment {
            message.sentiment = Some(sentiment);
        }
    }
}

// ── Sentiment ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score > SENTIMENT_LABEL_THRESHOLD {
            SentimentLabel::Positive
        } else if score < -SENTIMENT_LABEL_THRESHOLD {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Person,
    Location,
    Organization,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub salience: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    /// In `[-1, 1]`.
    pub score: f64,
    /// Share of sentiment-bearing words among all words.
    pub magnitude: f64,
    pub label: SentimentLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Entity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl SentimentAnalysis {
    /// Builds a result whose label is derived from `score`.
    pub fn from_score(score: f64, magnitude: f64) -> Self {
        let score = score.clamp(-1.0, 1.0);
        Self {
            score,
            magnitude: magnitude.max(0.0),
            label: SentimentLabel::from_score(score),
            entities: None,
            language: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sentiment: SentimentAnalysis,
    pub topics: Vec<String>,
    pub summary: String,
    pub key_phrases: Vec<String>,
}

// ── Generation ────────────────────────────────────────────────────────────────

/// One turn of history handed to a response generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

impl From<&Message> for ChatTurn {
    fn from(m: &Message) -> Self {
        Self { role: m.role, content: m.content.clone() }
    }
}

// ── Persistence ───────────────────────────────────────────────────────────────

/// Everything the store persists: the conversation list and the selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub current_conversation_id: Option<String>,
}

// ── API / events ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Result of a completed send-transaction.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub user_message: Message,
    pub assistant_message: Message,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameConversationRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationList {
    pub conversations: Vec<Conversation>,
    pub current_conversation_id: Option<String>,
}

/// Request sent by a WebSocket client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsChatRequest {
    Send { message: String },
    Cancel,
}

/// Progress of a send-transaction, broadcast to every subscriber.
///
/// `StreamChunk` carries the in-flight text; it is never written to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    StreamStart {
        conversation_id: String,
        message_id: String,
    },
    StreamChunk {
        conversation_id: String,
        message_id: String,
        delta: String,
        accumulated: String,
    },
    StreamEnd {
        conversation_id: String,
        message_id: String,
        full_content: String,
    },
    Annotated {
        conversation_id: String,
        message_id: String,
        sentiment: Option<SentimentAnalysis>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_follows_threshold() {
        assert_eq!(SentimentLabel::from_score(0.25), SentimentLabel::Positive);
        assert_eq!(SentimentLabel::from_score(0.15), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(-0.5), SentimentLabel::Negative);
        assert_eq!(SentimentLabel::from_score(0.2), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(-0.2), SentimentLabel::Neutral);
    }

    #[test]
    fn from_score_clamps_and_labels() {
        let s = SentimentAnalysis::from_score(3.0, -1.0);
        assert_eq!(s.score, 1.0);
        assert_eq!(s.magnitude, 0.0);
        assert_eq!(s.label, SentimentLabel::Positive);
    }

    #[test]
    fn patch_only_touches_supplied_fields() {
        let mut msg = Message {
            id: "m1".into(),
            role: MessageRole::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            status: MessageStatus::Pending,
            error: None,
            sentiment: None,
        };
        MessagePatch::finalized("done").apply(&mut msg);
        assert_eq!(msg.content, "done");
        assert_eq!(msg.status, MessageStatus::Complete);
        assert!(msg.sentiment.is_none());

        MessagePatch::content("done").with_sentiment(SentimentAnalysis::from_score(0.5, 0.1)).apply(&mut msg);
        assert_eq!(msg.sentiment.as_ref().map(|s| s.label), Some(SentimentLabel::Positive));
    }

    #[test]
    fn persisted_state_keeps_timestamps_and_sentiment() {
        let mut conv = Conversation::new("Demo".into());
        conv.messages.push(Message {
            id: "m1".into(),
            role: MessageRole::Assistant,
            content: "Hello!".into(),
            timestamp: Utc::now(),
            status: MessageStatus::Complete,
            error: None,
            sentiment: Some(SentimentAnalysis {
                entities: Some(vec![Entity {
                    name: "Yahir".into(),
                    entity_type: EntityType::Person,
                    salience: 0.75,
                }]),
                language: Some("es".into()),
                ..SentimentAnalysis::from_score(0.25, 0.5)
            }),
        });
        let state = PersistedState {
            current_conversation_id: Some(conv.id.clone()),
            conversations: vec![conv],
        };

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"type\":\"PERSON\""));
        let back: PersistedState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn message_status_defaults_to_complete_when_absent() {
        let json = r#"{"id":"m","role":"user","content":"hi","timestamp":"2024-01-01T00:00:00Z"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.status, MessageStatus::Complete);
        assert_eq!(msg.role, MessageRole::User);
    }

    #[test]
    fn chat_event_is_internally_tagged() {
        let ev = ChatEvent::StreamChunk {
            conversation_id: "c".into(),
            message_id: "m".into(),
            delta: "lo".into(),
            accumulated: "Hello".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "stream_chunk");
        assert_eq!(json["accumulated"], "Hello");
    }

    #[test]
    fn ws_request_parses_send_and_cancel() {
        let send: WsChatRequest = serde_json::from_str(r#"{"type":"send","message":"hola"}"#).unwrap();
        assert!(matches!(send, WsChatRequest::Send { message } if message == "hola"));
        let cancel: WsChatRequest = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert!(matches!(cancel, WsChatRequest::Cancel));
    }
}
