use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::styles::{GenerationParams, Style};

/// An editable chat message, used for in-place progress updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GenerationPhase {
    Submitted,
    InProgress { percent: f64 },
}

/// Everything needed to finish a generation once its webhook arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationContext {
    pub request_id: String,
    pub user_id: i64,
    pub style: Style,
    pub params: GenerationParams,
    pub progress_message: Option<MessageHandle>,
    pub start_time: DateTime<Utc>,
    pub phase: GenerationPhase,
}

impl GenerationContext {
    pub fn new(
        request_id: impl Into<String>,
        user_id: i64,
        style: Style,
        params: GenerationParams,
        progress_message: Option<MessageHandle>,
    ) -> Self {
        GenerationContext {
            request_id: request_id.into(),
            user_id,
            style,
            params,
            progress_message,
            start_time: Utc::now(),
            phase: GenerationPhase::Submitted,
        }
    }

    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start_time).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Utc::now())
    }
}
