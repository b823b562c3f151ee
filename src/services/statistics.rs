use std::sync::Arc;

use tracing::error;

use crate::db::models::UserStatistics;
use crate::services::store::{GenerationStatus, StatsRecord, UserStore};
use crate::utils::timing::log_generation_finished;

const TOP_STYLES: usize = 5;

/// Records generation outcomes. Storage failures are logged, never returned.
pub struct StatisticsManager {
    store: Arc<dyn UserStore>,
}

impl StatisticsManager {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        StatisticsManager { store }
    }

    pub async fn record(&self, user_id: i64, record: StatsRecord, variants: usize) {
        if record.status != GenerationStatus::Started {
            log_generation_finished(
                &record.request_id,
                user_id,
                record.style.key(),
                record.status.as_str(),
                record.elapsed.unwrap_or_default(),
                variants,
            );
        }
        if let Err(err) = self.store.record_statistics(user_id, &record).await {
            error!(
                "Failed to record {} statistics for request_id={} user_id={}: {err}",
                record.status.as_str(),
                record.request_id,
                user_id
            );
        }
    }
}

pub fn success_rate(stats: &UserStatistics) -> f64 {
    if stats.total_generations <= 0 {
        return 0.0;
    }
    stats.successful_generations as f64 * 100.0 / stats.total_generations as f64
}

pub fn format_user_summary(stats: &UserStatistics) -> String {
    let mut text = format!(
        "📊 Your statistics\n\nGenerations: {}\nSuccessful: {}\nSuccess rate: {:.1}%",
        stats.total_generations,
        stats.successful_generations,
        success_rate(stats)
    );

    let mut styles = stats.style_counts.iter().collect::<Vec<_>>();
    styles.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    if !styles.is_empty() {
        text.push_str("\n\nFavourite styles:");
        for (style, count) in styles.into_iter().take(TOP_STYLES) {
            text.push_str(&format!("\n• {style}: {count}"));
        }
    }
    text
}
