use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub log_level: String,
    pub database_url: String,
    pub provider_api_key: String,
    pub provider_api_url: String,
    pub provider_timeout_seconds: u64,
    pub webhook_base_url: String,
    pub webhook_path: String,
    pub webhook_host: String,
    pub webhook_port: u16,
    pub webhook_secret: String,
    pub webhook_signature_header: String,
    pub webhook_max_body_bytes: usize,
    pub variants_per_request: u32,
    pub default_image_quota: i64,
    pub generation_cooldown_seconds: u64,
    pub variant_retention_seconds: u64,
    pub orphan_event_window_seconds: u64,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_required(name: &str) -> Result<String> {
    let value = env::var(name).unwrap_or_default();
    if value.trim().is_empty() {
        return Err(anyhow!("{name} is required"));
    }
    Ok(value.trim().to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

const RESULT_IMAGE_MAX_BYTES: usize = 10 * 1024 * 1024;
const WEBHOOK_BODY_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Room for `variants` full-size results base64-encoded in one callback,
/// plus the surrounding JSON.
pub fn default_webhook_body_limit(variants: u32) -> usize {
    let encoded_image = RESULT_IMAGE_MAX_BYTES.div_ceil(3) * 4;
    (variants.max(1) as usize) * encoded_image + WEBHOOK_BODY_OVERHEAD_BYTES
}

fn normalize_database_url(value: String) -> String {
    if value.starts_with("sqlite+aiosqlite://") {
        return value.replacen("sqlite+aiosqlite://", "sqlite://", 1);
    }
    value
}

fn normalize_webhook_path(value: &str) -> String {
    let trimmed = value.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "/webhook".to_string();
    }
    format!("/{trimmed}")
}

/// Joins the public base URL and the webhook route into the callback URL
/// handed to the provider.
pub fn build_callback_url(base_url: &str, path: &str) -> Result<String> {
    let base = base_url.trim().trim_end_matches('/');
    let joined = format!("{base}{}", normalize_webhook_path(path));
    let parsed = Url::parse(&joined).map_err(|err| anyhow!("Invalid WEBHOOK_BASE_URL: {err}"))?;
    Ok(parsed.to_string())
}

impl Config {
    pub fn load() -> Result<Self> {
        let bot_token = env_required("BOT_TOKEN")?;
        let webhook_secret = env_required("WEBHOOK_SECRET")?;
        let provider_api_key = env_required("PROVIDER_API_KEY")?;
        let webhook_base_url = env_required("WEBHOOK_BASE_URL")?;
        let webhook_path = normalize_webhook_path(&env_string("WEBHOOK_PATH", "/webhook"));
        build_callback_url(&webhook_base_url, &webhook_path)?;

        let webhook_port = match env::var("WEBHOOK_PORT") {
            Ok(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| anyhow!("Invalid WEBHOOK_PORT value: {value}"))?,
            Err(_) => 8080,
        };

        let mut variants_per_request = env_u32("VARIANTS_PER_REQUEST", 2);
        if !(1..=4).contains(&variants_per_request) {
            warn!(
                "VARIANTS_PER_REQUEST={} is out of range 1..=4; clamping.",
                variants_per_request
            );
            variants_per_request = variants_per_request.clamp(1, 4);
        }

        Ok(Config {
            bot_token,
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            database_url: normalize_database_url(env_string(
                "DATABASE_URL",
                "sqlite://avatar_bot.db?mode=rwc",
            )),
            provider_api_key,
            provider_api_url: env_string("PROVIDER_API_URL", "https://api.stylize.example/v1")
                .trim_end_matches('/')
                .to_string(),
            provider_timeout_seconds: env_u64("PROVIDER_TIMEOUT_SECONDS", 60),
            webhook_base_url,
            webhook_path,
            webhook_host: env_string("WEBHOOK_HOST", "0.0.0.0"),
            webhook_port,
            webhook_secret,
            webhook_signature_header: env_string("WEBHOOK_SIGNATURE_HEADER", "x-webhook-signature")
                .trim()
                .to_lowercase(),
            webhook_max_body_bytes: match env::var("WEBHOOK_MAX_BODY_BYTES") {
                Ok(value) => value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| anyhow!("Invalid WEBHOOK_MAX_BODY_BYTES value: {value}"))?,
                Err(_) => default_webhook_body_limit(variants_per_request),
            },
            variants_per_request,
            default_image_quota: env_i64("DEFAULT_IMAGE_QUOTA", 3).max(0),
            generation_cooldown_seconds: env_u64("GENERATION_COOLDOWN_SECONDS", 10),
            variant_retention_seconds: env_u64("VARIANT_RETENTION_SECONDS", 3600).max(60),
            orphan_event_window_seconds: env_u64("ORPHAN_EVENT_WINDOW_SECONDS", 30),
        })
    }

    pub fn callback_url(&self) -> String {
        build_callback_url(&self.webhook_base_url, &self.webhook_path)
            .unwrap_or_else(|_| format!("{}{}", self.webhook_base_url, self.webhook_path))
    }

    pub fn webhook_bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.webhook_host, self.webhook_port)
            .parse::<SocketAddr>()
            .map_err(|err| anyhow!("Invalid webhook bind address: {err}"))
    }

    pub fn variant_retention(&self) -> Duration {
        Duration::from_secs(self.variant_retention_seconds)
    }

    pub fn orphan_event_window(&self) -> Duration {
        Duration::from_secs(self.orphan_event_window_seconds)
    }
}

pub const WELCOME_MESSAGE: &str = "👋 Hi! I turn your photos into stylized avatars.\n\
🎨 Send me a photo, pick a style, and I will do the rest.\n\n\
Press \"Create avatar\" to begin!";

pub const PHOTO_TIPS_MESSAGE: &str = "📸 Send me a photo.\n\
Tips:\n\
- good quality and lighting\n\
- a clearly visible face";

pub const INVALID_PHOTO_MESSAGE: &str = "⚠️ I could not use this photo.\n\
Please make sure that:\n\
- the file is a JPEG, PNG or WebP image\n\
- the file is smaller than 10 MB\n\
Try sending a different photo.";

pub const SUBMISSION_FAILED_MESSAGE: &str =
    "Something went wrong while starting the generation. Please try another style or retry later.";

pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again later.";

pub const NO_QUOTA_MESSAGE: &str =
    "😔 You have no images left or your subscription has expired.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_url_joins_with_single_slash() {
        let url = build_callback_url("https://bot.example.com/", "webhook").unwrap();
        assert_eq!(url, "https://bot.example.com/webhook");

        let url = build_callback_url("https://bot.example.com", "/hooks/provider/").unwrap();
        assert_eq!(url, "https://bot.example.com/hooks/provider");
    }

    #[test]
    fn callback_url_rejects_relative_base() {
        assert!(build_callback_url("bot.example.com", "/webhook").is_err());
    }

    #[test]
    fn empty_webhook_path_falls_back_to_default() {
        assert_eq!(normalize_webhook_path("  "), "/webhook");
        assert_eq!(normalize_webhook_path("/"), "/webhook");
    }

    #[test]
    fn webhook_body_limit_fits_every_variant() {
        let two = default_webhook_body_limit(2);
        assert!(two > 2 * 10 * 1024 * 1024 * 4 / 3);
        assert!(default_webhook_body_limit(4) > 2 * two - 1024 * 1024);
        assert_eq!(default_webhook_body_limit(0), default_webhook_body_limit(1));
    }

    #[test]
    fn legacy_sqlite_scheme_is_rewritten() {
        assert_eq!(
            normalize_database_url("sqlite+aiosqlite:///bot.db".to_string()),
            "sqlite:///bot.db"
        );
        assert_eq!(
            normalize_database_url("sqlite://bot.db".to_string()),
            "sqlite://bot.db"
        );
    }
}
