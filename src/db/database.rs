use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::models::{SettingsRow, StatisticsRow, SubscriptionRow, UserStatistics};
use crate::services::store::{
    GenerationStatus, QuotaStatus, StatsRecord, UserSettings, UserStore,
};
use crate::styles::QualityPreset;

const SUBSCRIPTION_DAYS: i64 = 30;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    default_quota: i64,
}

fn parse_style_counts(raw: &str) -> HashMap<String, i64> {
    match serde_json::from_str(raw) {
        Ok(counts) => counts,
        Err(err) => {
            warn!("Discarding unreadable style statistics {raw:?}: {err}");
            HashMap::new()
        }
    }
}

impl Database {
    pub async fn init(database_url: &str, default_quota: i64) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::with_pool(pool, default_quota).await
    }

    pub async fn with_pool(pool: SqlitePool, default_quota: i64) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (\
                user_id INTEGER PRIMARY KEY,\
                username TEXT,\
                registered_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,\
                last_activity TEXT,\
                notifications_enabled INTEGER NOT NULL DEFAULT 1,\
                quality_preset TEXT NOT NULL DEFAULT 'balanced'\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subscriptions (\
                user_id INTEGER PRIMARY KEY,\
                images_left INTEGER NOT NULL,\
                subscription_end TEXT\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS generations (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                request_id TEXT NOT NULL UNIQUE,\
                user_id INTEGER NOT NULL,\
                style TEXT NOT NULL,\
                params_json TEXT NOT NULL,\
                status TEXT NOT NULL,\
                error TEXT,\
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,\
                completed_at TEXT,\
                duration_seconds REAL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_generations_user_id ON generations(user_id);")
            .execute(&pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS statistics (\
                user_id INTEGER PRIMARY KEY,\
                total_generations INTEGER NOT NULL DEFAULT 0,\
                successful_generations INTEGER NOT NULL DEFAULT 0,\
                style_statistics TEXT NOT NULL DEFAULT '{}'\
            );",
        )
        .execute(&pool)
        .await?;

        info!("Database tables created successfully");

        Ok(Database {
            pool,
            default_quota,
        })
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Creates the user on first contact and refreshes activity afterwards.
    pub async fn register_user(&self, user_id: i64, username: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, username, last_activity) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET \
             username = COALESCE(excluded.username, users.username), \
             last_activity = excluded.last_activity",
        )
        .bind(user_id)
        .bind(username)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        self.ensure_subscription(user_id).await?;
        Ok(())
    }

    async fn ensure_subscription(&self, user_id: i64) -> Result<SubscriptionRow> {
        sqlx::query(
            "INSERT OR IGNORE INTO subscriptions (user_id, images_left, subscription_end) \
             VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(self.default_quota)
        .bind(Utc::now() + TimeDelta::days(SUBSCRIPTION_DAYS))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT images_left, subscription_end FROM subscriptions WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn toggle_notifications(&self, user_id: i64) -> Result<bool> {
        let mut settings = self.get_settings(user_id).await?;
        settings.notifications_enabled = !settings.notifications_enabled;
        self.update_settings(user_id, settings).await?;
        Ok(settings.notifications_enabled)
    }

    pub async fn user_statistics(&self, user_id: i64) -> Result<UserStatistics> {
        let row = sqlx::query_as::<_, StatisticsRow>(
            "SELECT total_generations, successful_generations, style_statistics \
             FROM statistics WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => UserStatistics {
                total_generations: row.total_generations,
                successful_generations: row.successful_generations,
                style_counts: parse_style_counts(&row.style_statistics),
            },
            None => UserStatistics::default(),
        })
    }

    async fn record_started(&self, user_id: i64, record: &StatsRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO generations (request_id, user_id, style, params_json, status) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT(request_id) DO NOTHING",
        )
        .bind(&record.request_id)
        .bind(user_id)
        .bind(record.style.key())
        .bind(serde_json::to_string(&record.params)?)
        .bind(GenerationStatus::Started.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_finished(&self, user_id: i64, record: &StatsRecord) -> Result<()> {
        let params_json = serde_json::to_string(&record.params)?;
        let duration = record.elapsed.map(|elapsed| elapsed.as_secs_f64());
        let succeeded = record.status == GenerationStatus::Success;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO generations \
             (request_id, user_id, style, params_json, status, error, completed_at, duration_seconds) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(request_id) DO UPDATE SET \
             status = excluded.status, error = excluded.error, \
             completed_at = excluded.completed_at, duration_seconds = excluded.duration_seconds",
        )
        .bind(&record.request_id)
        .bind(user_id)
        .bind(record.style.key())
        .bind(&params_json)
        .bind(record.status.as_str())
        .bind(record.error.as_deref())
        .bind(Utc::now())
        .bind(duration)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO statistics (user_id) VALUES (?)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let raw_counts: String =
            sqlx::query_scalar("SELECT style_statistics FROM statistics WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;
        let mut counts = parse_style_counts(&raw_counts);
        *counts.entry(record.style.key().to_string()).or_insert(0) += 1;

        sqlx::query(
            "UPDATE statistics SET \
             total_generations = total_generations + 1, \
             successful_generations = successful_generations + ?, \
             style_statistics = ? \
             WHERE user_id = ?",
        )
        .bind(i64::from(succeeded))
        .bind(serde_json::to_string(&counts)?)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for Database {
    async fn check_quota(&self, user_id: i64) -> Result<QuotaStatus> {
        let row = self.ensure_subscription(user_id).await?;
        let active = row
            .subscription_end
            .map_or(true, |subscription_end| subscription_end > Utc::now());
        Ok(QuotaStatus {
            active,
            remaining: row.images_left.max(0),
        })
    }

    async fn decrement_quota(&self, user_id: i64) -> Result<bool> {
        self.ensure_subscription(user_id).await?;
        let result = sqlx::query(
            "UPDATE subscriptions SET images_left = images_left - 1 \
             WHERE user_id = ? AND images_left > 0",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_statistics(&self, user_id: i64, record: &StatsRecord) -> Result<()> {
        match record.status {
            GenerationStatus::Started => self.record_started(user_id, record).await,
            GenerationStatus::Success | GenerationStatus::Failed => {
                self.record_finished(user_id, record).await
            }
        }
    }

    async fn get_settings(&self, user_id: i64) -> Result<UserSettings> {
        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT notifications_enabled, quality_preset FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => UserSettings {
                notifications_enabled: row.notifications_enabled,
                quality_preset: QualityPreset::from_key_or_default(Some(&row.quality_preset)),
            },
            None => UserSettings::default(),
        })
    }

    async fn update_settings(&self, user_id: i64, settings: UserSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, notifications_enabled, quality_preset) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET \
             notifications_enabled = excluded.notifications_enabled, \
             quality_preset = excluded.quality_preset",
        )
        .bind(user_id)
        .bind(settings.notifications_enabled)
        .bind(settings.quality_preset.key())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
