use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, error, info, warn};

use crate::generation::{estimate_remaining, GenerationContext, GenerationRegistry, VariantStore};
use crate::provider::types::{EventKind, WebhookEvent};
use crate::services::{
    GenerationStatus, NotificationManager, StatisticsManager, StatsRecord, UserStore,
};
use crate::utils::image::contrast_score;

const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";
const NO_IMAGES_MESSAGE: &str = "The service returned no usable images";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Processed,
    UnknownRequest,
}

/// Drives a registered generation through progress and terminal events.
pub struct WebhookReconciler {
    registry: Arc<GenerationRegistry>,
    variants: Arc<VariantStore>,
    notifications: NotificationManager,
    statistics: StatisticsManager,
    store: Arc<dyn UserStore>,
}

fn strip_data_url(encoded: &str) -> &str {
    match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    }
}

/// Decodes every image that can be decoded; failures are logged and skipped.
pub fn decode_images(request_id: &str, encoded: &[String]) -> Vec<Vec<u8>> {
    encoded
        .iter()
        .enumerate()
        .filter_map(|(index, value)| {
            match STANDARD.decode(strip_data_url(value.trim()).as_bytes()) {
                Ok(bytes) if !bytes.is_empty() => Some(bytes),
                Ok(_) => {
                    warn!("Empty image {index} in webhook for request_id={request_id}");
                    None
                }
                Err(err) => {
                    warn!("Failed to decode image {index} for request_id={request_id}: {err}");
                    None
                }
            }
        })
        .collect()
}

/// Scores each stored variant by contrast, then composes the comparison grid.
/// Returns the index of the best variant alongside the grid.
fn rank_and_compose(variants: &VariantStore, request_id: &str) -> (Option<usize>, Option<Vec<u8>>) {
    let mut index = 0;
    while let Some(variant) = variants.get_variant(request_id, index) {
        match contrast_score(&variant.image_bytes) {
            Some(score) => {
                variants.update_score(request_id, index, score);
            }
            None => debug!("Variant {index} of request_id={request_id} could not be scored"),
        }
        index += 1;
    }

    let best = variants.get_best(request_id).and_then(|best| {
        variants
            .get_variants(request_id)?
            .iter()
            .position(|variant| Arc::ptr_eq(&variant.image_bytes, &best.image_bytes))
    });
    (best, variants.build_comparison_grid(request_id))
}

impl WebhookReconciler {
    pub fn new(
        registry: Arc<GenerationRegistry>,
        variants: Arc<VariantStore>,
        notifications: NotificationManager,
        statistics: StatisticsManager,
        store: Arc<dyn UserStore>,
    ) -> Self {
        WebhookReconciler {
            registry,
            variants,
            notifications,
            statistics,
            store,
        }
    }

    pub async fn handle(&self, event: WebhookEvent) -> ReconcileOutcome {
        let request_id = event.request_id.trim().to_string();

        let mut applied = false;
        if event.event == EventKind::Progress {
            let Some(context) = self.registry.lookup(&request_id) else {
                return self.unrecognized(event);
            };
            self.progress(&context, &event).await;
            applied = true;
        }

        let Some(kind) = event.terminal_kind() else {
            if applied {
                return ReconcileOutcome::Processed;
            }
            if !self.registry.contains(&request_id) {
                return self.unrecognized(event);
            }
            debug!(
                "Ignoring non-actionable event status={:?} for request_id={}",
                event.status, request_id
            );
            return ReconcileOutcome::Processed;
        };

        // Claiming the entry first makes concurrent duplicates see an
        // unknown id, so side effects run once.
        let Some(context) = self.registry.remove(&request_id) else {
            if applied {
                return ReconcileOutcome::Processed;
            }
            return self.unrecognized(event);
        };
        info!(
            "Processing {} outcome of {} event for request_id={} user_id={}",
            kind.as_str(),
            event.event.as_str(),
            request_id,
            context.user_id
        );
        if kind == EventKind::Completed {
            self.complete(&context, &event).await;
        } else {
            let message = event.error_message().unwrap_or(UNKNOWN_ERROR_MESSAGE);
            self.fail(&context, message).await;
        }
        self.retire(&context);
        ReconcileOutcome::Processed
    }

    /// Runs events that arrived before their request was registered.
    pub async fn replay(&self, events: Vec<WebhookEvent>) {
        for event in events {
            let request_id = event.request_id.clone();
            if self.handle(event).await == ReconcileOutcome::UnknownRequest {
                debug!("Replayed event for request_id={request_id} found no registration");
            }
        }
    }

    fn unrecognized(&self, event: WebhookEvent) -> ReconcileOutcome {
        warn!(
            "Webhook for unknown request_id={:?} event={}",
            event.request_id,
            event.event.as_str()
        );
        if self.registry.park_unrecognized(event) {
            debug!("Parked unrecognized webhook event for a possible late registration");
        }
        ReconcileOutcome::UnknownRequest
    }

    async fn progress(&self, context: &GenerationContext, event: &WebhookEvent) {
        let percent = event.progress.unwrap_or(0.0).clamp(0.0, 100.0);
        if !self.registry.mark_progress(&context.request_id, percent) {
            debug!(
                "request_id={} retired before progress {}% was applied",
                context.request_id, percent
            );
            return;
        }
        let remaining = estimate_remaining(context.elapsed(), percent);
        if let Err(err) = self
            .notifications
            .send_progress(context, percent, remaining)
            .await
        {
            warn!(
                "Failed to send progress for request_id={} user_id={}: {err}",
                context.request_id, context.user_id
            );
        }
    }

    async fn complete(&self, context: &GenerationContext, event: &WebhookEvent) {
        let request_id = &context.request_id;
        let user_id = context.user_id;
        let images = decode_images(request_id, event.images());
        if images.is_empty() {
            warn!(
                "Completed webhook for request_id={} user_id={} carried no usable images ({} received)",
                request_id,
                user_id,
                event.images().len()
            );
            self.fail(context, NO_IMAGES_MESSAGE).await;
            return;
        }

        let count = images.len();
        self.variants.add_variants(request_id, images, &context.params);

        match self.store.decrement_quota(user_id).await {
            Ok(true) => {}
            Ok(false) => warn!("user_id={user_id} had no quota left to decrement for request_id={request_id}"),
            Err(err) => error!("Failed to decrement quota for user_id={user_id} request_id={request_id}: {err}"),
        }
        let remaining = match self.store.check_quota(user_id).await {
            Ok(quota) => Some(quota.remaining),
            Err(err) => {
                error!("Failed to read quota for user_id={user_id}: {err}");
                None
            }
        };

        let photos = self
            .variants
            .get_variants(request_id)
            .unwrap_or_default()
            .into_iter()
            .map(|variant| variant.image_bytes.to_vec())
            .collect::<Vec<_>>();
        if let Err(err) = self
            .notifications
            .deliver_results(user_id, photos, remaining)
            .await
        {
            error!("Failed to deliver results for request_id={request_id} user_id={user_id}: {err}");
        }

        if count > 1 {
            let variants = Arc::clone(&self.variants);
            let grid_id = request_id.clone();
            let ranked =
                tokio::task::spawn_blocking(move || rank_and_compose(&variants, &grid_id)).await;
            match ranked {
                Ok((best, Some(grid))) => {
                    if let Err(err) = self
                        .notifications
                        .send_comparison(user_id, grid, best)
                        .await
                    {
                        warn!("Failed to send comparison grid for request_id={request_id}: {err}");
                    }
                }
                Ok((_, None)) => {
                    warn!("No comparison grid could be built for request_id={request_id}")
                }
                Err(err) => error!("Comparison grid task for request_id={request_id} failed: {err}"),
            }
        }

        self.record(context, GenerationStatus::Success, None, count)
            .await;
    }

    async fn fail(&self, context: &GenerationContext, message: &str) {
        warn!(
            "Generation failed for request_id={} user_id={}: {}",
            context.request_id, context.user_id, message
        );
        if let Err(err) = self
            .notifications
            .send_error(context.user_id, message, true)
            .await
        {
            error!(
                "Failed to notify user_id={} about failed request_id={}: {err}",
                context.user_id, context.request_id
            );
        }
        self.record(context, GenerationStatus::Failed, Some(message.to_string()), 0)
            .await;
    }

    async fn record(
        &self,
        context: &GenerationContext,
        status: GenerationStatus,
        error: Option<String>,
        variants: usize,
    ) {
        let record = StatsRecord {
            request_id: context.request_id.clone(),
            style: context.style,
            params: context.params.clone(),
            status,
            error,
            elapsed: Some(context.elapsed()),
        };
        self.statistics.record(context.user_id, record, variants).await;
    }

    fn retire(&self, context: &GenerationContext) {
        self.variants.cleanup(&context.request_id);
        self.registry.remove(&context.request_id);
        info!(
            "Retired request_id={} user_id={} active={} stored_variants={}",
            context.request_id,
            context.user_id,
            self.registry.len(),
            self.variants.request_count()
        );
    }
}
