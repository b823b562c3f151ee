pub mod reconciler;
pub mod server;
pub mod signature;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

pub use reconciler::{ReconcileOutcome, WebhookReconciler};
pub use server::{router, serve, WebhookState};

/// Failures of the inbound webhook endpoint. Responses carry no body.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing or invalid webhook signature")]
    Unauthenticated,
    #[error("unknown request_id {0:?}")]
    UnknownRequest(String),
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
    #[error("webhook processing failed: {0}")]
    Internal(String),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::Unauthenticated => StatusCode::UNAUTHORIZED,
            WebhookError::UnknownRequest(_) => StatusCode::NOT_FOUND,
            WebhookError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match &self {
            WebhookError::Internal(_) => error!("{self}"),
            WebhookError::MalformedPayload(_) => warn!("{self}"),
            _ => {}
        }
        self.status().into_response()
    }
}
