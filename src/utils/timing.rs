use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use teloxide::types::Message;
use tracing::info;

/// Tracks one user interaction from receipt to reply on the `bot.timing` target.
#[derive(Debug)]
pub struct CommandTimer {
    command: String,
    chat_id: i64,
    user_id: Option<i64>,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: &'static str,
    detail: Option<String>,
    completed: bool,
}

impl CommandTimer {
    fn from_message(command: &str, message: &Message) -> Self {
        CommandTimer {
            command: command.to_string(),
            chat_id: message.chat.id.0,
            user_id: message
                .from
                .as_ref()
                .and_then(|user| i64::try_from(user.id.0).ok()),
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success",
            detail: None,
            completed: false,
        }
    }

    pub fn complete(&mut self, status: &'static str, detail: Option<String>) {
        self.status = status;
        self.detail = detail;
        self.log_completed();
    }

    fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        info!(
            target: "bot.timing",
            "event=command_completed command={} chat_id={} user_id={:?} started_at={} duration_s={:.3} status={} detail={}",
            self.command,
            self.chat_id,
            self.user_id,
            self.started_at.to_rfc3339(),
            self.started_perf.elapsed().as_secs_f64(),
            self.status,
            self.detail.as_deref().unwrap_or_default()
        );
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        self.log_completed();
    }
}

pub fn start_command_timer(command: &str, message: &Message) -> CommandTimer {
    let timer = CommandTimer::from_message(command, message);
    info!(
        target: "bot.timing",
        "event=command_received command={} chat_id={} user_id={:?} received_at={}",
        timer.command,
        timer.chat_id,
        timer.user_id,
        timer.started_at.to_rfc3339()
    );
    timer
}

/// Wraps one provider call with request/response lines on `bot.timing`.
pub async fn log_provider_timing<T, E, F, Fut>(
    operation: &str,
    user_id: i64,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started_perf = Instant::now();
    info!(
        target: "bot.timing",
        "event=provider_request operation={} user_id={} started_at={}",
        operation,
        user_id,
        Utc::now().to_rfc3339()
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };
    info!(
        target: "bot.timing",
        "event=provider_response operation={} user_id={} duration_s={:.3} status={}",
        operation,
        user_id,
        started_perf.elapsed().as_secs_f64(),
        status
    );

    result
}

pub fn log_generation_finished(
    request_id: &str,
    user_id: i64,
    style: &str,
    status: &str,
    elapsed: Duration,
    variants: usize,
) {
    info!(
        target: "bot.timing",
        "event=generation_finished request_id={} user_id={} style={} status={} duration_s={:.3} variants={}",
        request_id,
        user_id,
        style,
        status,
        elapsed.as_secs_f64(),
        variants
    );
}
