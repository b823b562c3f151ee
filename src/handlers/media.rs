use std::time::Duration;

use anyhow::{anyhow, Result};
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::{error, warn};

use crate::config::CONFIG;
use crate::utils::http::{get_http_client, should_retry_error, should_retry_status, truncate_for_log};

const DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

/// File id of the photo in a message: the largest photo size, or an image
/// sent as a document.
pub fn message_image_file_id(message: &Message) -> Option<FileId> {
    if let Some(sizes) = message.photo() {
        return sizes
            .iter()
            .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
            .map(|size| size.file.id.clone());
    }
    message
        .document()
        .filter(|document| {
            document
                .mime_type
                .as_ref()
                .is_some_and(|mime| mime.type_().as_str() == "image")
        })
        .map(|document| document.file.id.clone())
}

pub fn has_image(message: &Message) -> bool {
    message_image_file_id(message).is_some()
}

pub async fn get_file_url(bot: &Bot, file_id: &FileId) -> Result<String> {
    let file = bot.get_file(file_id.clone()).await?;
    Ok(format!(
        "https://api.telegram.org/file/bot{}/{}",
        CONFIG.bot_token, file.path
    ))
}

async fn download(url: &str) -> Result<Vec<u8>> {
    let client = get_http_client();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let last_attempt = attempt >= DOWNLOAD_MAX_ATTEMPTS;
        let delay = Duration::from_millis(DOWNLOAD_BASE_DELAY_MS << (attempt - 1));

        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    "Failed to fetch photo: {err} (timeout={}, connect={}, attempt={attempt}/{DOWNLOAD_MAX_ATTEMPTS})",
                    err.is_timeout(),
                    err.is_connect()
                );
                if !should_retry_error(&err) || last_attempt {
                    return Err(err.into());
                }
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Photo download failed with status {status}: {}",
                truncate_for_log(&body, DOWNLOAD_ERROR_BODY_LIMIT)
            );
            if !should_retry_status(status) || last_attempt {
                return Err(anyhow!("photo download failed with status {status}"));
            }
            tokio::time::sleep(delay).await;
            continue;
        }

        match response.bytes().await {
            Ok(bytes) => return Ok(bytes.to_vec()),
            Err(err) => {
                error!("Failed to read photo bytes: {err} (attempt={attempt}/{DOWNLOAD_MAX_ATTEMPTS})");
                if last_attempt {
                    return Err(err.into());
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

pub async fn download_message_image(bot: &Bot, message: &Message) -> Result<Vec<u8>> {
    let file_id = message_image_file_id(message).ok_or_else(|| anyhow!("message has no image"))?;
    let url = get_file_url(bot, &file_id).await?;
    download(&url).await
}
