use thiserror::Error;

/// Top-level application error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Storage errors ───────────────────────────────────────────────────────
    #[error("State storage I/O failed: {message}")]
    StorageIo {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("State record could not be (de)serialized: {0}")]
    StorageSerde(#[source] serde_json::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnectionFailed(#[source] sqlx::Error),

    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    // ── Lookup errors ────────────────────────────────────────────────────────
    #[error("Conversation '{id}' not found")]
    ConversationNotFound { id: String },

    #[error("Message '{message_id}' not found in conversation '{conversation_id}'")]
    MessageNotFound { conversation_id: String, message_id: String },

    // ── Generation errors ────────────────────────────────────────────────────
    #[error("Ollama service unavailable at {host}")]
    OllamaUnavailable { host: String },

    #[error("Model '{model_name}' not found in Ollama")]
    ModelNotFound { model_name: String },

    #[error("Inference error: {message}")]
    InferenceError { message: String },

    #[error("Response generation failed: {message}")]
    GenerationFailed { message: String },

    #[error("Generation for message '{message_id}' was cancelled")]
    Cancelled { message_id: String },

    // ── Sentiment errors ─────────────────────────────────────────────────────
    #[error("Sentiment analysis failed: {message}")]
    SentimentFailed { message: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    #[error("No conversation is selected")]
    NoConversationSelected,

    #[error("Invalid message update: {reason}")]
    InvalidPatch { reason: String },

    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn storage_io(message: impl Into<String>, source: std::io::Error) -> Self {
        AppError::StorageIo { message: message.into(), source }
    }

    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::ConversationNotFound { .. } | AppError::MessageNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. }
                | AppError::FieldTooLong { .. }
                | AppError::NoConversationSelected
                | AppError::InvalidPatch { .. }
        )
    }

    pub fn is_agent_unavailable(&self) -> bool {
        matches!(self, AppError::OllamaUnavailable { .. } | AppError::ModelNotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled { .. })
    }
}
