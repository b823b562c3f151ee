pub mod chat;
pub mod notifications;
pub mod quality;
pub mod statistics;
pub mod store;
#[cfg(test)]
pub mod testing;

pub use chat::{ActionButton, ChatTransport, TelegramChat};
pub use notifications::NotificationManager;
pub use quality::QualityManager;
pub use statistics::StatisticsManager;
pub use store::{GenerationStatus, QuotaStatus, StatsRecord, UserSettings, UserStore};
