use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::StatusCode;
use tracing::{info, warn};

use crate::provider::types::{
    ProviderErrorBody, SubmitRequest, SubmitResponse, SUBSCRIBED_EVENTS,
};
use crate::styles::{
    GenerationParams, Position, DEFAULT_GUIDANCE_SCALE, DEFAULT_IMAGE_GUIDANCE_SCALE,
    DEFAULT_INFERENCE_STEPS, DEFAULT_NEGATIVE_PROMPT, DEFAULT_NUM_OUTPUTS,
};
use crate::utils::http::{get_http_client, truncate_for_log};

const GENERATE_ENDPOINT: &str = "image/generate";
const API_KEY_HEADER: &str = "X-API-Key";
const ERROR_BODY_LOG_LIMIT: usize = 800;

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("provider response was not understood: {0}")]
    MalformedResponse(String),
}

/// Accepts an image plus parameters and returns the provider's request id.
/// Results arrive later through the webhook.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn submit(
        &self,
        image: &[u8],
        params: &GenerationParams,
    ) -> Result<String, SubmissionError>;
}

#[derive(Debug, Clone)]
pub struct ProviderClient {
    endpoint: String,
    api_key: String,
    callback_url: String,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(
        api_url: &str,
        api_key: impl Into<String>,
        callback_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        ProviderClient {
            endpoint: format!("{}/{}", api_url.trim_end_matches('/'), GENERATE_ENDPOINT),
            api_key: api_key.into(),
            callback_url: callback_url.into(),
            timeout,
        }
    }
}

/// Fills absent parameters with defaults; values set by the caller win.
pub fn build_submit_request<'a>(
    image_b64: String,
    params: &'a GenerationParams,
    callback_url: &'a str,
) -> SubmitRequest<'a> {
    SubmitRequest {
        image: image_b64,
        prompt: &params.prompt,
        negative_prompt: params
            .negative_prompt
            .as_deref()
            .unwrap_or(DEFAULT_NEGATIVE_PROMPT),
        guidance_scale: params.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE),
        image_guidance_scale: params
            .image_guidance_scale
            .unwrap_or(DEFAULT_IMAGE_GUIDANCE_SCALE),
        position: params.position.unwrap_or(Position::Face).as_str(),
        num_inference_steps: params.num_inference_steps.unwrap_or(DEFAULT_INFERENCE_STEPS),
        num_outputs: params.num_outputs.unwrap_or(DEFAULT_NUM_OUTPUTS),
        webhook_url: callback_url,
        webhook_events: SUBSCRIBED_EVENTS,
    }
}

fn rejection_message(body: &str) -> String {
    match serde_json::from_str::<ProviderErrorBody>(body) {
        Ok(ProviderErrorBody {
            message: Some(message),
            ..
        }) if !message.trim().is_empty() => message.trim().to_string(),
        Ok(ProviderErrorBody {
            error: Some(error), ..
        }) => match error.as_str() {
            Some(text) => text.to_string(),
            None => error.to_string(),
        },
        _ => truncate_for_log(body.trim(), ERROR_BODY_LOG_LIMIT),
    }
}

#[async_trait]
impl GenerationProvider for ProviderClient {
    async fn submit(
        &self,
        image: &[u8],
        params: &GenerationParams,
    ) -> Result<String, SubmissionError> {
        let payload = build_submit_request(STANDARD.encode(image), params, &self.callback_url);

        let response = get_http_client()
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                SubmissionError::Transport(format!(
                    "{err} (timeout={}, connect={})",
                    err.is_timeout(),
                    err.is_connect()
                ))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SubmissionError::Transport(err.to_string()))?;

        if status != StatusCode::OK {
            warn!(
                "Provider rejected submission with status {}: {}",
                status,
                truncate_for_log(&body, ERROR_BODY_LOG_LIMIT)
            );
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&body),
            });
        }

        let parsed: SubmitResponse = serde_json::from_str(&body)
            .map_err(|err| SubmissionError::MalformedResponse(err.to_string()))?;
        let request_id = parsed
            .request_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                SubmissionError::MalformedResponse("response has no request_id".to_string())
            })?;

        info!(
            "Provider accepted submission request_id={} steps={} outputs={}",
            request_id, payload.num_inference_steps, payload.num_outputs
        );
        Ok(request_id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::styles::{resolve_generation_params, QualityPreset, Style};

    #[test]
    fn absent_parameters_take_defaults() {
        let params = GenerationParams::prompt_only("a portrait");
        let request = build_submit_request("aW1n".to_string(), &params, "https://bot.example/webhook");
        assert_eq!(request.negative_prompt, DEFAULT_NEGATIVE_PROMPT);
        assert_eq!(request.guidance_scale, DEFAULT_GUIDANCE_SCALE);
        assert_eq!(request.image_guidance_scale, DEFAULT_IMAGE_GUIDANCE_SCALE);
        assert_eq!(request.num_inference_steps, 50);
        assert_eq!(request.num_outputs, 1);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["image"], json!("aW1n"));
        assert_eq!(value["position"], json!("face"));
        assert_eq!(value["webhook_url"], json!("https://bot.example/webhook"));
        assert_eq!(
            value["webhook_events"],
            json!(["completed", "failed", "progress"])
        );
    }

    #[test]
    fn caller_values_win_over_defaults() {
        let mut params = resolve_generation_params(Style::Cyberpunk, QualityPreset::High, 3);
        params.negative_prompt = Some("blurry".to_string());
        let request = build_submit_request(String::new(), &params, "https://bot.example/hook");
        assert_eq!(request.negative_prompt, "blurry");
        assert_eq!(request.num_inference_steps, 75);
        assert_eq!(request.guidance_scale, 8.0);
        assert_eq!(request.image_guidance_scale, 1.5);
        assert_eq!(request.num_outputs, 3);
        assert_eq!(request.position, Style::Cyberpunk.config().position.as_str());
    }

    #[test]
    fn rejection_message_prefers_provider_message() {
        assert_eq!(
            rejection_message(r#"{"message":"quota exceeded"}"#),
            "quota exceeded"
        );
        assert_eq!(rejection_message(r#"{"error":"bad image"}"#), "bad image");
        assert_eq!(rejection_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = ProviderClient::new(
            "https://api.example/v1/",
            "key",
            "https://bot.example/webhook",
            Duration::from_secs(5),
        );
        assert_eq!(client.endpoint, "https://api.example/v1/image/generate");
    }
}
