//! Runtime configuration read from the environment (`.env` is loaded by `main`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::agent::ollama::DEFAULT_MODEL;
use crate::errors::AppError;
use crate::service::ChatConfig;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_STREAM_DELAY_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Json { data_dir: PathBuf },
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationBackend {
    /// Canned replies streamed word by word.
    Simulated { word_delay: Duration },
    Ollama { base_url: String, model: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub storage: StorageBackend,
    pub generation: GenerationBackend,
    pub max_message_length: usize,
    pub cancel_on_switch: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unset and blank values
    /// fall back to defaults; malformed ones are rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let storage = match get("STORAGE_BACKEND").as_deref().unwrap_or("json") {
            "json" => StorageBackend::Json {
                data_dir: PathBuf::from(get("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            },
            "postgres" => StorageBackend::Postgres {
                database_url: get("DATABASE_URL").ok_or_else(|| AppError::InvalidConfig {
                    key: "DATABASE_URL".to_string(),
                    message: "required when STORAGE_BACKEND=postgres".to_string(),
                })?,
            },
            other => return Err(invalid("STORAGE_BACKEND", format!("unknown backend '{other}'"))),
        };

        let generation = match get("GENERATION_BACKEND").as_deref().unwrap_or("simulated") {
            "simulated" => GenerationBackend::Simulated {
                word_delay: Duration::from_millis(parse_or(&get, "STREAM_DELAY_MS", DEFAULT_STREAM_DELAY_MS)?),
            },
            "ollama" => GenerationBackend::Ollama {
                base_url: get("OLLAMA_API_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
                model: get("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            },
            other => return Err(invalid("GENERATION_BACKEND", format!("unknown backend '{other}'"))),
        };

        let defaults = ChatConfig::default();
        let max_message_length = parse_or(&get, "MAX_MESSAGE_LENGTH", defaults.max_message_length)?;
        if max_message_length == 0 {
            return Err(invalid("MAX_MESSAGE_LENGTH", "must be greater than zero".to_string()));
        }

        Ok(Self {
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            storage,
            generation,
            max_message_length,
            cancel_on_switch: parse_or(&get, "CANCEL_ON_SWITCH", defaults.cancel_on_switch)?,
        })
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            max_message_length: self.max_message_length,
            cancel_on_switch: self.cancel_on_switch,
            ..ChatConfig::default()
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| invalid(key, format!("'{raw}': {e}"))),
    }
}

fn invalid(key: &str, message: String) -> AppError {
    AppError::InvalidConfig { key: key.to_string(), message }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, AppError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.storage, StorageBackend::Json { data_dir: PathBuf::from("./data") });
        assert_eq!(
            cfg.generation,
            GenerationBackend::Simulated { word_delay: Duration::from_millis(50) }
        );
        assert_eq!(cfg.max_message_length, 8000);
        assert!(cfg.cancel_on_switch);
    }

    #[test]
    fn reads_postgres_and_ollama_settings() {
        let cfg = config(&[
            ("STORAGE_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("GENERATION_BACKEND", "ollama"),
            ("OLLAMA_MODEL", "mistral"),
            ("CANCEL_ON_SWITCH", "false"),
            ("MAX_MESSAGE_LENGTH", "120"),
        ])
        .unwrap();

        assert_eq!(
            cfg.storage,
            StorageBackend::Postgres { database_url: "postgres://localhost/chat".into() }
        );
        assert_eq!(
            cfg.generation,
            GenerationBackend::Ollama {
                base_url: "http://localhost:11434".into(),
                model: "mistral".into(),
            }
        );
        let chat = cfg.chat_config();
        assert_eq!(chat.max_message_length, 120);
        assert!(!chat.cancel_on_switch);
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = config(&[("STORAGE_BACKEND", "postgres")]).unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig { key, .. } if key == "DATABASE_URL"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        for (key, value) in [
            ("PORT", "eighty"),
            ("STREAM_DELAY_MS", "-1"),
            ("CANCEL_ON_SWITCH", "maybe"),
            ("MAX_MESSAGE_LENGTH", "0"),
            ("STORAGE_BACKEND", "sqlite"),
        ] {
            let err = config(&[(key, value)]).unwrap_err();
            assert!(matches!(&err, AppError::InvalidConfig { key: k, .. } if k == key), "{key}={value}");
        }
    }
}
