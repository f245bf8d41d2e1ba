//! Response generation capability.
//!
//! A [`ResponseGenerator`] turns conversation history into a reply, optionally
//! streaming fragments through a channel as they are produced.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::AppError;
use crate::models::ChatTurn;

pub mod ollama;
pub mod simulated;

pub use ollama::OllamaGenerator;
pub use simulated::SimulatedGenerator;

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Produces the reply to the last turn of `history`.
    ///
    /// When `chunks` is supplied it receives zero or more fragments before the
    /// call resolves; the fragments concatenate to the returned text.
    async fn generate(
        &self,
        history: Vec<ChatTurn>,
        chunks: Option<mpsc::Sender<String>>,
    ) -> Result<String, AppError>;
}
