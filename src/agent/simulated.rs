//! Demo generator: canned replies streamed word by word with a fixed delay.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::agent::ResponseGenerator;
use crate::errors::AppError;
use crate::models::{ChatTurn, MessageRole};

const GREETING_REPLY: &str =
    "¡Hola! Soy tu asistente de IA. ¿En qué puedo ayudarte hoy?";

const CODE_REPLY: &str = "Por supuesto, aquí tienes un ejemplo de código en Rust:

```rust
fn saludar(nombre: &str) -> String {
    format!(\"¡Hola, {nombre}! Bienvenido\")
}
```

¿Necesitas ayuda con algo más específico?";

const CAPABILITIES_REPLY: &str = "Mis capacidades incluyen:

- Conversación natural en múltiples idiomas
- Generación y análisis de código
- Análisis de datos y estadísticas
- Ayuda creativa y redacción
- Resolución de problemas matemáticos
- Investigación y resúmenes
- Traducción entre idiomas

¿Qué te gustaría explorar?";

const DEFAULT_REPLY: &str = "Entiendo tu consulta. Déjame ayudarte con eso. \
Como asistente de IA, puedo ayudarte con una amplia variedad de tareas, \
desde responder preguntas hasta ayudarte con programación, análisis de datos, \
escritura creativa y mucho más. ¿Hay algo específico en lo que te gustaría que profundizara?";

/// Picks a canned reply by keyword and streams it one word at a time.
#[derive(Debug, Clone)]
pub struct SimulatedGenerator {
    word_delay: Duration,
}

impl SimulatedGenerator {
    pub fn new(word_delay: Duration) -> Self {
        Self { word_delay }
    }

    /// No delay between words.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    fn reply_for(prompt: &str) -> &'static str {
        let prompt = prompt.to_lowercase();
        if prompt.contains("hola") {
            GREETING_REPLY
        } else if prompt.contains("código") {
            CODE_REPLY
        } else if prompt.contains("capacidades") {
            CAPABILITIES_REPLY
        } else {
            DEFAULT_REPLY
        }
    }
}

impl Default for SimulatedGenerator {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl ResponseGenerator for SimulatedGenerator {
    async fn generate(
        &self,
        history: Vec<ChatTurn>,
        chunks: Option<mpsc::Sender<String>>,
    ) -> Result<String, AppError> {
        let prompt = history
            .iter()
            .rev()
            .find(|t| t.role == MessageRole::User)
            .ok_or_else(|| AppError::GenerationFailed {
                message: "history has no user turn to answer".to_string(),
            })?;
        let reply = Self::reply_for(&prompt.content);

        if let Some(tx) = chunks {
            for (i, word) in reply.split(' ').enumerate() {
                if !self.word_delay.is_zero() {
                    tokio::time::sleep(self.word_delay).await;
                }
                let fragment = if i == 0 { word.to_string() } else { format!(" {word}") };
                if tx.send(fragment).await.is_err() {
                    debug!("Chunk receiver dropped, stopping simulated stream");
                    break;
                }
            }
        }

        Ok(reply.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(content: &str) -> ChatTurn {
        ChatTurn { role: MessageRole::User, content: content.to_string() }
    }

    #[tokio::test]
    async fn picks_reply_by_keyword() {
        let g = SimulatedGenerator::instant();
        assert_eq!(g.generate(vec![user("Hola!")], None).await.unwrap(), GREETING_REPLY);
        assert_eq!(g.generate(vec![user("muéstrame código")], None).await.unwrap(), CODE_REPLY);
        assert_eq!(
            g.generate(vec![user("¿cuáles son tus capacidades?")], None).await.unwrap(),
            CAPABILITIES_REPLY
        );
        assert_eq!(g.generate(vec![user("something else")], None).await.unwrap(), DEFAULT_REPLY);
    }

    #[tokio::test]
    async fn answers_the_latest_user_turn() {
        let g = SimulatedGenerator::instant();
        let history = vec![
            user("hola"),
            ChatTurn { role: MessageRole::Assistant, content: GREETING_REPLY.into() },
            user("tus capacidades"),
        ];
        assert_eq!(g.generate(history, None).await.unwrap(), CAPABILITIES_REPLY);
    }

    #[tokio::test]
    async fn fragments_concatenate_to_reply() {
        let g = SimulatedGenerator::instant();
        let (tx, mut rx) = mpsc::channel(512);
        let reply = g.generate(vec![user("código")], Some(tx)).await.unwrap();

        let mut joined = String::new();
        let mut count = 0;
        while let Some(chunk) = rx.recv().await {
            joined.push_str(&chunk);
            count += 1;
        }
        assert_eq!(joined, reply);
        assert!(count > 1);
    }

    #[tokio::test]
    async fn empty_history_fails() {
        let g = SimulatedGenerator::instant();
        assert!(matches!(
            g.generate(Vec::new(), None).await,
            Err(AppError::GenerationFailed { .. })
        ));
    }
}
