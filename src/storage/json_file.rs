//! JSON file backend for the state record.
//!
//! Writes go to a sibling temp file that is then renamed over the target, so
//! a crash mid-write never leaves a truncated record behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use crate::errors::AppError;
use crate::models::{PersistedState, STATE_RECORD_NAME};
use crate::storage::StateStorage;

pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// Stores the record as `<dir>/ai-conversations.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self { path: dir.as_ref().join(format!("{STATE_RECORD_NAME}.json")) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

#[async_trait]
impl StateStorage for JsonFileStorage {
    async fn load(&self) -> Result<Option<PersistedState>, AppError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state record at {}, starting empty", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                error!("Failed to read state record {}: {e}", self.path.display());
                return Err(AppError::storage_io(
                    format!("Failed to read {}", self.path.display()),
                    e,
                ));
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content).map(Some).map_err(|e| {
            error!("State record {} is corrupt: {e}", self.path.display());
            AppError::StorageSerde(e)
        })
    }

    async fn save(&self, state: &PersistedState) -> Result<(), AppError> {
        let json = serde_json::to_vec_pretty(state).map_err(AppError::StorageSerde)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::storage_io(format!("Failed to create {}", parent.display()), e)
                })?;
            }
        }

        let tmp = self.temp_path();
        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        write.await.map_err(|e| {
            error!("Failed to write state record {}: {e}", self.path.display());
            AppError::storage_io(format!("Failed to write {}", self.path.display()), e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, Message, MessageRole, MessageStatus};
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample_state() -> PersistedState {
        let mut conv = Conversation::new("Demo".into());
        conv.messages.push(Message {
            id: "m1".into(),
            role: MessageRole::User,
            content: "hola".into(),
            timestamp: Utc::now(),
            status: MessageStatus::Complete,
            error: None,
            sentiment: None,
        });
        PersistedState {
            current_conversation_id: Some(conv.id.clone()),
            conversations: vec![conv],
        }
    }

    #[tokio::test]
    async fn missing_file_is_first_run() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::in_dir(dir.path());
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_file_is_first_run() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::in_dir(dir.path());
        std::fs::write(storage.path(), "  \n").unwrap();
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_restores_state() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::in_dir(dir.path().join("nested"));
        let state = sample_state();

        storage.save(&state).await.unwrap();
        assert!(storage.path().ends_with("ai-conversations.json"));
        assert!(!storage.temp_path().exists());

        let loaded = storage.load().await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::in_dir(dir.path());
        std::fs::write(storage.path(), "{not json").unwrap();
        assert!(matches!(storage.load().await, Err(AppError::StorageSerde(_))));
    }
}
