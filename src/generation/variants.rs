use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::styles::GenerationParams;
use crate::utils::image::{compose_grid, GRID_CELL_SIZE};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const NEUTRAL_SCORE: f64 = 0.0;

#[derive(Debug, Clone)]
pub struct VariantResult {
    pub image_bytes: Arc<[u8]>,
    pub params: GenerationParams,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

/// Result images per request id, kept in provider output order.
#[derive(Debug)]
pub struct VariantStore {
    variants: Mutex<HashMap<String, Vec<VariantResult>>>,
    retention: TimeDelta,
    cell_size: u32,
}

impl Default for VariantStore {
    fn default() -> Self {
        VariantStore::new(DEFAULT_RETENTION)
    }
}

impl VariantStore {
    pub fn new(retention: Duration) -> Self {
        VariantStore {
            variants: Mutex::new(HashMap::new()),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::hours(1)),
            cell_size: GRID_CELL_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_cell_size(mut self, cell_size: u32) -> Self {
        self.cell_size = cell_size.max(1);
        self
    }

    /// Appends one variant per image and sweeps expired requests.
    pub fn add_variants(&self, request_id: &str, images: Vec<Vec<u8>>, params: &GenerationParams) {
        self.add_variants_at(request_id, images, params, Utc::now());
    }

    pub(crate) fn add_variants_at(
        &self,
        request_id: &str,
        images: Vec<Vec<u8>>,
        params: &GenerationParams,
        now: DateTime<Utc>,
    ) {
        let mut variants = self.variants.lock();
        let sequence = variants.entry(request_id.to_string()).or_default();
        sequence.extend(images.into_iter().map(|bytes| VariantResult {
            image_bytes: Arc::from(bytes),
            params: params.clone(),
            score: NEUTRAL_SCORE,
            created_at: now,
        }));
        Self::evict_locked(&mut variants, now, self.retention);
    }

    pub fn get_variants(&self, request_id: &str) -> Option<Vec<VariantResult>> {
        self.variants.lock().get(request_id).cloned()
    }

    pub fn get_variant(&self, request_id: &str, index: usize) -> Option<VariantResult> {
        self.variants
            .lock()
            .get(request_id)
            .and_then(|sequence| sequence.get(index))
            .cloned()
    }

    pub fn update_score(&self, request_id: &str, index: usize, score: f64) -> bool {
        let mut variants = self.variants.lock();
        match variants
            .get_mut(request_id)
            .and_then(|sequence| sequence.get_mut(index))
        {
            Some(variant) => {
                variant.score = score;
                true
            }
            None => false,
        }
    }

    /// Highest score wins; ties go to the earliest variant.
    pub fn get_best(&self, request_id: &str) -> Option<VariantResult> {
        let variants = self.variants.lock();
        let sequence = variants.get(request_id)?;
        let mut best: Option<&VariantResult> = None;
        for variant in sequence {
            match best {
                Some(current) if variant.score <= current.score => {}
                _ => best = Some(variant),
            }
        }
        best.cloned()
    }

    pub fn build_comparison_grid(&self, request_id: &str) -> Option<Vec<u8>> {
        let images = {
            let variants = self.variants.lock();
            variants
                .get(request_id)?
                .iter()
                .map(|variant| Arc::clone(&variant.image_bytes))
                .collect::<Vec<_>>()
        };

        match compose_grid(images.iter().map(|bytes| &bytes[..]), self.cell_size) {
            Ok(grid) => grid,
            Err(err) => {
                error!("Failed to compose comparison grid for request_id={request_id}: {err}");
                None
            }
        }
    }

    /// Drops every variant for the id; returns whether anything was stored.
    pub fn cleanup(&self, request_id: &str) -> bool {
        self.variants.lock().remove(request_id).is_some()
    }

    pub fn request_count(&self) -> usize {
        self.variants.lock().len()
    }

    fn evict_locked(
        variants: &mut HashMap<String, Vec<VariantResult>>,
        now: DateTime<Utc>,
        retention: TimeDelta,
    ) {
        let before = variants.len();
        variants.retain(|_, sequence| match sequence.first() {
            Some(oldest) => now - oldest.created_at <= retention,
            None => true,
        });
        let evicted = before - variants.len();
        if evicted > 0 {
            info!("Evicted {} expired variant set(s)", evicted);
        }
    }
}
