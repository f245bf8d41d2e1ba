pub mod chat_service;
pub mod send_phase;

pub use chat_service::{ChatConfig, ChatService, PlaceholderHandle};
pub use send_phase::SendPhase;
