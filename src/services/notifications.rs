use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::generation::GenerationContext;
use crate::services::chat::{ActionButton, ChatTransport};
use crate::services::store::UserStore;

pub const RETRY_CALLBACK: &str = "retry";
pub const COMPARISON_CAPTION: &str = "🔍 Variant comparison";

/// Caption for the comparison grid; `best` is the zero-based index of the
/// highest scoring variant.
pub fn comparison_caption(best: Option<usize>) -> String {
    match best {
        Some(index) => format!("{COMPARISON_CAPTION}\n⭐ Highest contrast: variant {}", index + 1),
        None => COMPARISON_CAPTION.to_string(),
    }
}

pub fn format_remaining(remaining: Duration) -> String {
    let seconds = remaining.as_secs();
    if seconds < 60 {
        format!("{seconds} sec")
    } else {
        format!("{} min {} sec", seconds / 60, seconds % 60)
    }
}

pub fn progress_text(percent: f64, remaining: Option<Duration>) -> String {
    let mut text = format!("🎨 Generating avatar… {}%", percent.clamp(0.0, 100.0).round());
    if let Some(remaining) = remaining {
        text.push_str(&format!("\n⏱ About {} left", format_remaining(remaining)));
    }
    text
}

pub fn error_text(message: &str) -> String {
    format!("❌ Generation failed: {message}")
}

pub fn quota_text(remaining: i64) -> String {
    format!("✨ Images left: {}", remaining.max(0))
}

/// User-facing side of a generation. Progress and error messages honour the
/// user's notification setting; results are always delivered.
pub struct NotificationManager {
    chat: Arc<dyn ChatTransport>,
    store: Arc<dyn UserStore>,
}

impl NotificationManager {
    pub fn new(chat: Arc<dyn ChatTransport>, store: Arc<dyn UserStore>) -> Self {
        NotificationManager { chat, store }
    }

    async fn notifications_enabled(&self, user_id: i64) -> bool {
        match self.store.get_settings(user_id).await {
            Ok(settings) => settings.notifications_enabled,
            Err(err) => {
                warn!("Failed to load settings for user_id={user_id}: {err}");
                true
            }
        }
    }

    pub async fn send_progress(
        &self,
        context: &GenerationContext,
        percent: f64,
        remaining: Option<Duration>,
    ) -> Result<()> {
        if !self.notifications_enabled(context.user_id).await {
            debug!(
                "Skipping progress for request_id={} user_id={}: notifications disabled",
                context.request_id, context.user_id
            );
            return Ok(());
        }

        let text = progress_text(percent, remaining);
        match context.progress_message {
            Some(handle) => self.chat.edit_text(handle, &text).await,
            None => self
                .chat
                .send_text(context.user_id, &text, &[])
                .await
                .map(|_| ()),
        }
    }

    pub async fn send_error(&self, user_id: i64, message: &str, retry_allowed: bool) -> Result<()> {
        if !self.notifications_enabled(user_id).await {
            return Ok(());
        }
        let actions = if retry_allowed {
            vec![ActionButton::new("🔄 Retry", RETRY_CALLBACK)]
        } else {
            Vec::new()
        };
        self.chat
            .send_text(user_id, &error_text(message), &actions)
            .await
            .map(|_| ())
    }

    pub async fn deliver_results(
        &self,
        user_id: i64,
        photos: Vec<Vec<u8>>,
        remaining_quota: Option<i64>,
    ) -> Result<()> {
        if photos.is_empty() {
            return Ok(());
        }
        self.chat
            .send_photos(user_id, photos, Some("Variant 1"))
            .await?;
        if let Some(remaining) = remaining_quota {
            self.chat
                .send_text(user_id, &quota_text(remaining), &[])
                .await?;
        }
        Ok(())
    }

    pub async fn send_comparison(
        &self,
        user_id: i64,
        grid: Vec<u8>,
        best: Option<usize>,
    ) -> Result<()> {
        let caption = comparison_caption(best);
        self.chat
            .send_photos(user_id, vec![grid], Some(&caption))
            .await
    }
}
