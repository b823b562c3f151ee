use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::services::store::UserStore;
use crate::styles::{resolve_generation_params, GenerationParams, QualityPreset, Style};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetInfo {
    pub preset: QualityPreset,
    pub steps: u32,
    pub estimated_seconds: u64,
    pub description: &'static str,
}

pub fn available_presets() -> Vec<PresetInfo> {
    QualityPreset::ALL
        .iter()
        .map(|preset| PresetInfo {
            preset: *preset,
            steps: preset.num_inference_steps(),
            estimated_seconds: preset.estimated_seconds(),
            description: preset.description(),
        })
        .collect()
}

pub struct QualityManager {
    store: Arc<dyn UserStore>,
    num_outputs: u32,
}

impl QualityManager {
    pub fn new(store: Arc<dyn UserStore>, num_outputs: u32) -> Self {
        QualityManager {
            store,
            num_outputs: num_outputs.max(1),
        }
    }

    pub async fn preset_for(&self, user_id: i64) -> QualityPreset {
        match self.store.get_settings(user_id).await {
            Ok(settings) => settings.quality_preset,
            Err(err) => {
                warn!("Failed to load quality preset for user_id={user_id}: {err}");
                QualityPreset::default()
            }
        }
    }

    pub async fn generation_params(&self, user_id: i64, style: Style) -> GenerationParams {
        let preset = self.preset_for(user_id).await;
        resolve_generation_params(style, preset, self.num_outputs)
    }

    pub async fn set_preset(&self, user_id: i64, preset: QualityPreset) -> Result<()> {
        let mut settings = self.store.get_settings(user_id).await?;
        settings.quality_preset = preset;
        self.store.update_settings(user_id, settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::MemoryUserStore;

    #[tokio::test]
    async fn stored_preset_drives_parameters() {
        let store = Arc::new(MemoryUserStore::default());
        let manager = QualityManager::new(store.clone(), 2);

        let params = manager.generation_params(5, Style::Superhero).await;
        assert_eq!(params.quality, Some(QualityPreset::Balanced));
        assert_eq!(params.num_outputs, Some(2));

        manager.set_preset(5, QualityPreset::Fast).await.unwrap();
        let params = manager.generation_params(5, Style::Superhero).await;
        assert_eq!(params.num_inference_steps, Some(30));
        assert!(store.settings(5).notifications_enabled);
    }

    #[tokio::test]
    async fn settings_failure_falls_back_to_balanced() {
        let store = Arc::new(MemoryUserStore::default());
        store.fail_settings(true);
        let manager = QualityManager::new(store, 1);
        assert_eq!(manager.preset_for(5).await, QualityPreset::Balanced);
    }

    #[test]
    fn presets_are_listed_fastest_first() {
        let presets = available_presets();
        assert_eq!(presets.len(), 3);
        assert_eq!(presets[0].preset, QualityPreset::Fast);
        assert_eq!(presets[0].estimated_seconds, 24);
        assert_eq!(presets[2].steps, 75);
    }
}
