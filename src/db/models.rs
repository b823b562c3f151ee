use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct SettingsRow {
    pub notifications_enabled: bool,
    pub quality_preset: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub images_left: i64,
    pub subscription_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StatisticsRow {
    pub total_generations: i64,
    pub successful_generations: i64,
    pub style_statistics: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserStatistics {
    pub total_generations: i64,
    pub successful_generations: i64,
    pub style_counts: HashMap<String, i64>,
}
