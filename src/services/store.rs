use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::styles::{GenerationParams, QualityPreset, Style};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSettings {
    pub notifications_enabled: bool,
    pub quality_preset: QualityPreset,
}

impl Default for UserSettings {
    fn default() -> Self {
        UserSettings {
            notifications_enabled: true,
            quality_preset: QualityPreset::Balanced,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub active: bool,
    pub remaining: i64,
}

impl QuotaStatus {
    pub fn can_generate(&self) -> bool {
        self.active && self.remaining > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Started,
    Success,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Started => "started",
            GenerationStatus::Success => "success",
            GenerationStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsRecord {
    pub request_id: String,
    pub style: Style,
    pub params: GenerationParams,
    pub status: GenerationStatus,
    pub error: Option<String>,
    pub elapsed: Option<Duration>,
}

/// Durable per-user state the generation core depends on.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn check_quota(&self, user_id: i64) -> Result<QuotaStatus>;

    /// Takes one image off the user's quota; false when nothing was left.
    async fn decrement_quota(&self, user_id: i64) -> Result<bool>;

    async fn record_statistics(&self, user_id: i64, record: &StatsRecord) -> Result<()>;

    async fn get_settings(&self, user_id: i64) -> Result<UserSettings>;

    async fn update_settings(&self, user_id: i64, settings: UserSettings) -> Result<()>;
}
