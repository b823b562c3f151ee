use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::provider::types::WebhookEvent;
use crate::webhook::reconciler::{ReconcileOutcome, WebhookReconciler};
use crate::webhook::signature::verify_signature;
use crate::webhook::WebhookError;

#[derive(Clone)]
pub struct WebhookState {
    reconciler: Arc<WebhookReconciler>,
    secret: Arc<str>,
    signature_header: HeaderName,
}

impl WebhookState {
    pub fn new(
        reconciler: Arc<WebhookReconciler>,
        secret: &str,
        signature_header: &str,
    ) -> Result<Self> {
        let signature_header = HeaderName::from_bytes(signature_header.trim().as_bytes())
            .map_err(|err| anyhow!("Invalid signature header name {signature_header:?}: {err}"))?;
        Ok(WebhookState {
            reconciler,
            secret: Arc::from(secret),
            signature_header,
        })
    }
}

/// `max_body_bytes` caps the raw callback body; completion events carry
/// every result image inline.
pub fn router(state: WebhookState, webhook_path: &str, max_body_bytes: usize) -> Router {
    Router::new()
        .route(webhook_path, post(receive_webhook))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn receive_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, WebhookError> {
    let signature = headers
        .get(&state.signature_header)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(&state.secret, &body, signature) {
        warn!(
            "Rejected webhook with {} signature ({} bytes)",
            if signature.is_empty() { "missing" } else { "invalid" },
            body.len()
        );
        return Err(WebhookError::Unauthenticated);
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|err| WebhookError::MalformedPayload(err.to_string()))?;
    let request_id = event.request_id.clone();
    let event_kind = event.event;

    // Detached so a dropped provider connection cannot cut retirement short.
    let reconciler = Arc::clone(&state.reconciler);
    let outcome = tokio::spawn(async move { reconciler.handle(event).await })
        .await
        .map_err(|err| {
            WebhookError::Internal(format!(
                "handler for request_id={request_id} event={} aborted: {err}",
                event_kind.as_str()
            ))
        })?;

    match outcome {
        ReconcileOutcome::Processed => Ok(StatusCode::OK),
        ReconcileOutcome::UnknownRequest => Err(WebhookError::UnknownRequest(request_id)),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Webhook server shutting down");
}

pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    info!("Webhook server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use http_body_util::BodyExt;
    use image::ImageFormat;
    use tower::ServiceExt;

    use super::*;
    use crate::generation::{GenerationContext, GenerationRegistry, VariantStore};
    use crate::services::testing::{FakeChat, MemoryUserStore};
    use crate::services::{NotificationManager, StatisticsManager};
    use crate::styles::{resolve_generation_params, QualityPreset, Style};
    use crate::utils::image::test_images::solid;
    use crate::config::default_webhook_body_limit;
    use crate::webhook::signature::compute_signature;

    const SECRET: &str = "test-secret";
    const HEADER: &str = "x-webhook-signature";

    struct Fixture {
        app: Router,
        registry: Arc<GenerationRegistry>,
        chat: Arc<FakeChat>,
        store: Arc<MemoryUserStore>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(GenerationRegistry::default());
        let variants = Arc::new(VariantStore::default());
        let chat = Arc::new(FakeChat::default());
        let store = Arc::new(MemoryUserStore::default());
        let reconciler = Arc::new(WebhookReconciler::new(
            registry.clone(),
            variants,
            NotificationManager::new(chat.clone(), store.clone()),
            StatisticsManager::new(store.clone()),
            store.clone(),
        ));
        let state = WebhookState::new(reconciler, SECRET, HEADER).unwrap();
        Fixture {
            app: router(state, "/webhook", default_webhook_body_limit(2)),
            registry,
            chat,
            store,
        }
    }

    fn register(fixture: &Fixture, request_id: &str) {
        fixture
            .registry
            .insert(GenerationContext::new(
                request_id,
                11,
                Style::Superhero,
                resolve_generation_params(Style::Superhero, QualityPreset::Balanced, 1),
                None,
            ))
            .unwrap();
    }

    fn signed(body: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn completed_body(request_id: &str) -> String {
        let image = STANDARD.encode(solid(4, 4, [10, 20, 30], ImageFormat::Png));
        serde_json::json!({
            "request_id": request_id,
            "event": "completed",
            "status": "completed",
            "result": {"images": [image]},
        })
        .to_string()
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let response = fixture()
            .app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_side_effects() {
        let fixture = fixture();
        register(&fixture, "req-1");
        let body = completed_body("req-1");

        for signature in [None, Some("deadbeef".to_string()), Some(compute_signature("wrong", body.as_bytes()))] {
            let response = fixture
                .app
                .clone()
                .oneshot(signed(&body, signature))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        assert!(fixture.registry.contains("req-1"));
        assert!(fixture.chat.sent().is_empty());
        assert_eq!(fixture.store.quota(11), 3);
    }

    #[tokio::test]
    async fn valid_completion_returns_empty_ok() {
        let fixture = fixture();
        register(&fixture, "req-1");
        let body = completed_body("req-1");
        let signature = compute_signature(SECRET, body.as_bytes());

        let response = fixture
            .app
            .clone()
            .oneshot(signed(&body, Some(signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
        assert!(!fixture.registry.contains("req-1"));
        assert_eq!(fixture.store.quota(11), 2);
    }

    #[tokio::test]
    async fn unknown_and_retired_ids_are_not_found() {
        let fixture = fixture();
        let body = completed_body("req-missing");
        let signature = compute_signature(SECRET, body.as_bytes());
        let response = fixture
            .app
            .clone()
            .oneshot(signed(&body, Some(signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        register(&fixture, "req-1");
        let failed = r#"{"request_id":"req-1","event":"failed","status":"failed"}"#;
        let signature = compute_signature(SECRET, failed.as_bytes());
        let first = fixture
            .app
            .clone()
            .oneshot(signed(failed, Some(signature.clone())))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let late = fixture
            .app
            .clone()
            .oneshot(signed(failed, Some(signature)))
            .await
            .unwrap();
        assert_eq!(late.status(), StatusCode::NOT_FOUND);
        assert_eq!(fixture.store.records(11).len(), 1);
    }

    #[tokio::test]
    async fn large_completion_is_accepted_and_retires() {
        let fixture = fixture();
        register(&fixture, "req-big");
        let large = "A".repeat(2_000_000);
        let body = serde_json::json!({
            "request_id": "req-big",
            "event": "completed",
            "status": "completed",
            "result": {"images": [large.clone(), large]},
        })
        .to_string();
        assert!(body.len() > 2 * 1024 * 1024);
        let signature = compute_signature(SECRET, body.as_bytes());

        let response = fixture
            .app
            .clone()
            .oneshot(signed(&body, Some(signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!fixture.registry.contains("req-big"));
        assert_eq!(fixture.store.quota(11), 2);
    }

    #[tokio::test]
    async fn body_over_configured_limit_is_rejected() {
        let fixture = fixture();
        let state = WebhookState::new(
            Arc::new(WebhookReconciler::new(
                fixture.registry.clone(),
                Arc::new(VariantStore::default()),
                NotificationManager::new(fixture.chat.clone(), fixture.store.clone()),
                StatisticsManager::new(fixture.store.clone()),
                fixture.store.clone(),
            )),
            SECRET,
            HEADER,
        )
        .unwrap();
        let app = router(state, "/webhook", 1024);
        register(&fixture, "req-1");
        let body = completed_body("req-1") + &" ".repeat(2048);
        let signature = compute_signature(SECRET, body.as_bytes());

        let response = app.oneshot(signed(&body, Some(signature))).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(fixture.registry.contains("req-1"));
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let fixture = fixture();
        let body = "{not json";
        let signature = compute_signature(SECRET, body.as_bytes());
        let response = fixture
            .app
            .oneshot(signed(body, Some(signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
