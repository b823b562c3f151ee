use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use teloxide::Bot;

use crate::config::Config;
use crate::db::Database;
use crate::generation::{GenerationRegistry, VariantStore};
use crate::provider::{GenerationProvider, ProviderClient};
use crate::services::{
    ChatTransport, NotificationManager, QualityManager, StatisticsManager, TelegramChat, UserStore,
};
use crate::webhook::WebhookReconciler;

/// A normalized photo waiting for the user to pick a style.
#[derive(Debug, Clone)]
pub struct PendingPhoto {
    pub bytes: Arc<[u8]>,
    pub received_at: Instant,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<GenerationRegistry>,
    pub provider: Arc<dyn GenerationProvider>,
    pub reconciler: Arc<WebhookReconciler>,
    pub quality: Arc<QualityManager>,
    pub statistics: Arc<StatisticsManager>,
    pub pending_photos: Arc<Mutex<HashMap<i64, PendingPhoto>>>,
    pub pending_photo_ttl: Duration,
}

impl AppState {
    pub fn new(bot: Bot, db: Database, config: &Config) -> Self {
        let store: Arc<dyn UserStore> = Arc::new(db.clone());
        let chat: Arc<dyn ChatTransport> = Arc::new(TelegramChat::new(bot));
        let registry = Arc::new(GenerationRegistry::new(
            config.variant_retention(),
            config.orphan_event_window(),
        ));
        let variants = Arc::new(VariantStore::new(config.variant_retention()));
        let provider: Arc<dyn GenerationProvider> = Arc::new(ProviderClient::new(
            &config.provider_api_url,
            config.provider_api_key.clone(),
            config.callback_url(),
            Duration::from_secs(config.provider_timeout_seconds),
        ));
        let reconciler = Arc::new(WebhookReconciler::new(
            registry.clone(),
            variants,
            NotificationManager::new(chat, store.clone()),
            StatisticsManager::new(store.clone()),
            store.clone(),
        ));

        AppState {
            db,
            registry,
            provider,
            reconciler,
            quality: Arc::new(QualityManager::new(
                store.clone(),
                config.variants_per_request,
            )),
            statistics: Arc::new(StatisticsManager::new(store)),
            pending_photos: Arc::new(Mutex::new(HashMap::new())),
            pending_photo_ttl: config.variant_retention(),
        }
    }

    pub fn store_pending_photo(&self, user_id: i64, bytes: Vec<u8>) {
        let now = Instant::now();
        let ttl = self.pending_photo_ttl;
        let mut pending = self.pending_photos.lock();
        pending.retain(|_, photo| now.duration_since(photo.received_at) <= ttl);
        pending.insert(
            user_id,
            PendingPhoto {
                bytes: Arc::from(bytes),
                received_at: now,
            },
        );
    }

    /// The user's last photo, unless it has expired.
    pub fn pending_photo(&self, user_id: i64) -> Option<PendingPhoto> {
        let mut pending = self.pending_photos.lock();
        match pending.get(&user_id) {
            Some(photo) if photo.received_at.elapsed() <= self.pending_photo_ttl => {
                Some(photo.clone())
            }
            Some(_) => {
                pending.remove(&user_id);
                None
            }
            None => None,
        }
    }
}
