use serde::{Deserialize, Serialize};

/// Events the provider is asked to call back for.
pub const SUBSCRIBED_EVENTS: [&str; 3] = ["completed", "failed", "progress"];

#[derive(Debug, Serialize)]
pub struct SubmitRequest<'a> {
    pub image: String,
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub guidance_scale: f32,
    pub image_guidance_scale: f32,
    pub position: &'a str,
    pub num_inference_steps: u32,
    pub num_outputs: u32,
    pub webhook_url: &'a str,
    pub webhook_events: [&'static str; 3],
}

#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Other,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookResult {
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookErrorInfo {
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of an inbound provider callback. Only trusted after the signature
/// over the raw body has been verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub event: EventKind,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WebhookResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WebhookErrorInfo>,
}

impl WebhookEvent {
    /// Terminal outcome carried by the event: its kind when that is
    /// `completed`/`failed`, otherwise a `completed`/`failed` status on any kind.
    pub fn terminal_kind(&self) -> Option<EventKind> {
        match self.event {
            EventKind::Completed | EventKind::Failed => Some(self.event),
            _ => match self.status.trim().to_ascii_lowercase().as_str() {
                "completed" => Some(EventKind::Completed),
                "failed" => Some(EventKind::Failed),
                _ => None,
            },
        }
    }

    pub fn images(&self) -> &[String] {
        self.result
            .as_ref()
            .map(|result| result.images.as_slice())
            .unwrap_or(&[])
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error
            .as_ref()
            .and_then(|error| error.message.as_deref())
            .map(str::trim)
            .filter(|message| !message.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_completed_payload() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"request_id":"req-1","event":"completed","status":"completed","result":{"images":["aGVsbG8="]}}"#,
        )
        .unwrap();
        assert_eq!(event.event, EventKind::Completed);
        assert_eq!(event.images(), ["aGVsbG8=".to_string()]);
        assert_eq!(event.terminal_kind(), Some(EventKind::Completed));
    }

    #[test]
    fn unknown_event_kind_is_tolerated() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"request_id":"req-2","event":"queued","status":"queued"}"#)
                .unwrap();
        assert_eq!(event.event, EventKind::Other);
        assert_eq!(event.terminal_kind(), None);
    }

    #[test]
    fn terminal_status_on_other_kind_counts_as_terminal() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"request_id":"req-3","event":"cancelled","status":"FAILED"}"#)
                .unwrap();
        assert_eq!(event.terminal_kind(), Some(EventKind::Failed));
    }

    #[test]
    fn progress_with_terminal_status_is_terminal() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"request_id":"req-6","event":"progress","status":"completed","progress":100}"#,
        )
        .unwrap();
        assert_eq!(event.event, EventKind::Progress);
        assert_eq!(event.terminal_kind(), Some(EventKind::Completed));
    }

    #[test]
    fn blank_error_message_is_absent() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"request_id":"req-4","event":"failed","error":{"message":"   "}}"#,
        )
        .unwrap();
        assert_eq!(event.error_message(), None);
        assert!(event.images().is_empty());
    }

    #[test]
    fn progress_accepts_integers() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"request_id":"req-5","event":"progress","progress":40}"#)
                .unwrap();
        assert_eq!(event.progress, Some(40.0));
    }
}
