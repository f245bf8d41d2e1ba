use async_trait::async_trait;
use rig::client::Nothing;
use rig::completion::Chat;
use rig::message::Message as RigMessage;
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::agent::ResponseGenerator;
use crate::errors::AppError;
use crate::models::{ChatTurn, MessageRole};

pub const DEFAULT_MODEL: &str = "llama3.2";
const PREAMBLE: &str = "You are a helpful AI assistant running locally via Ollama. \
                        Be concise, accurate, and friendly. \
                        If you don't know something, say so.";

/// Builds a rig [`RigMessage`] history list from conversation turns.
fn to_rig_history(turns: &[ChatTurn]) -> Vec<RigMessage> {
    turns
        .iter()
        .map(|t| match t.role {
            MessageRole::User => RigMessage::user(&t.content),
            MessageRole::Assistant => RigMessage::assistant(&t.content),
        })
        .collect()
}

/// Generator backed by a local Ollama model through rig.
/// A fresh agent is built per request so the history is replayed each time.
/// The reply arrives whole and is forwarded as a single fragment.
#[derive(Clone)]
pub struct OllamaGenerator {
    client: ollama::Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str) -> Result<Self, AppError> {
        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(base_url)
            .build()
            .map_err(|e| AppError::InvalidConfig {
                key: "OLLAMA_API_BASE_URL".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            model: model.to_string(),
        })
    }

    fn map_error(&self, message: String) -> AppError {
        if message.contains("Connection refused") || message.contains("connect") {
            AppError::OllamaUnavailable { host: self.base_url.clone() }
        } else if message.contains("model") {
            AppError::ModelNotFound { model_name: self.model.clone() }
        } else {
            AppError::InferenceError { message }
        }
    }
}

#[async_trait]
impl ResponseGenerator for OllamaGenerator {
    async fn generate(
        &self,
        mut history: Vec<ChatTurn>,
        chunks: Option<mpsc::Sender<String>>,
    ) -> Result<String, AppError> {
        let prompt = match history.pop() {
            Some(turn) if turn.role == MessageRole::User => turn.content,
            _ => {
                return Err(AppError::GenerationFailed {
                    message: "history must end with a user turn".to_string(),
                })
            }
        };

        let agent = self
            .client
            .agent(&self.model)
            .preamble(PREAMBLE)
            .build();

        let content = agent
            .chat(prompt.as_str(), to_rig_history(&history))
            .await
            .map_err(|e| {
                error!("Ollama inference failed: {e}");
                self.map_error(e.to_string())
            })?;

        if let Some(tx) = chunks {
            if tx.send(content.clone()).await.is_err() {
                debug!("Chunk receiver dropped before Ollama reply was forwarded");
            }
        }
        Ok(content)
    }
}
