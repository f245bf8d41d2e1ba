//! Phases of a single send-transaction.
//!
//! Idle -> Sending -> Streaming -> Finalizing -> Annotating -> Idle
//! Sending | Streaming | Finalizing -> Idle (failure)

use serde::Serialize;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPhase {
    Idle,
    Sending,
    Streaming,
    Finalizing,
    Annotating,
}

impl SendPhase {
    pub fn can_advance(self, to: SendPhase) -> bool {
        use SendPhase::*;
        matches!(
            (self, to),
            (Idle, Sending)
                | (Sending, Streaming)
                | (Streaming, Finalizing)
                | (Finalizing, Annotating)
                | (Annotating, Idle)
                | (Sending, Idle)
                | (Streaming, Idle)
                | (Finalizing, Idle)
        )
    }

    pub fn advance(self, to: SendPhase) -> Result<SendPhase, AppError> {
        if self.can_advance(to) {
            Ok(to)
        } else {
            Err(AppError::Unexpected(format!("invalid send transition {self:?} -> {to:?}")))
        }
    }
}
