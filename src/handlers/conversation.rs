use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::ChatAction;
use tracing::{error, info, warn};

use crate::config::{
    GENERIC_ERROR_MESSAGE, INVALID_PHOTO_MESSAGE, NO_QUOTA_MESSAGE, PHOTO_TIPS_MESSAGE,
    SUBMISSION_FAILED_MESSAGE,
};
use crate::generation::{GenerationContext, MessageHandle, RegistryError};
use crate::handlers::access::generation_cooldown;
use crate::handlers::media::download_message_image;
use crate::services::chat::ActionButton;
use crate::services::{GenerationStatus, StatsRecord, UserStore};
use crate::state::AppState;
use crate::styles::Style;
use crate::utils::image::{normalize_image, ImageError};
use crate::utils::telegram::{inline_keyboard, start_chat_action_heartbeat};
use crate::utils::timing::log_provider_timing;

pub const STYLE_CALLBACK_PREFIX: &str = "style:";

pub fn style_actions() -> Vec<ActionButton> {
    Style::ALL
        .iter()
        .map(|style| {
            ActionButton::new(
                style.label(),
                format!("{STYLE_CALLBACK_PREFIX}{}", style.key()),
            )
        })
        .collect()
}

fn parse_style(data: &str) -> Option<Style> {
    data.strip_prefix(STYLE_CALLBACK_PREFIX)
        .and_then(Style::from_key)
}

async fn send_style_keyboard(bot: &Bot, chat_id: ChatId) -> Result<()> {
    bot.send_message(chat_id, "🎨 Pick a style for your avatar:")
        .reply_markup(inline_keyboard(&style_actions()))
        .await?;
    Ok(())
}

pub async fn photo_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    let user_id = i64::try_from(user.id.0)?;
    state
        .db
        .register_user(user_id, user.username.as_deref())
        .await?;

    let _typing = start_chat_action_heartbeat(bot.clone(), message.chat.id, ChatAction::Typing);
    let raw = match download_message_image(&bot, &message).await {
        Ok(raw) => raw,
        Err(err) => {
            error!("Failed to download photo for user {user_id}: {err}");
            bot.send_message(message.chat.id, GENERIC_ERROR_MESSAGE)
                .await?;
            return Ok(());
        }
    };

    let normalized = tokio::task::spawn_blocking(move || normalize_image(&raw)).await?;
    match normalized {
        Ok(bytes) => {
            info!("Accepted photo from user {user_id} ({} bytes)", bytes.len());
            state.store_pending_photo(user_id, bytes);
            send_style_keyboard(&bot, message.chat.id).await?;
        }
        Err(err @ (ImageError::Decode(_) | ImageError::TooLarge { .. })) => {
            warn!("Rejected photo from user {user_id}: {err}");
            bot.send_message(message.chat.id, INVALID_PHOTO_MESSAGE)
                .await?;
        }
        Err(err) => {
            error!("Failed to prepare photo from user {user_id}: {err}");
            bot.send_message(message.chat.id, GENERIC_ERROR_MESSAGE)
                .await?;
        }
    }
    Ok(())
}

pub async fn style_callback(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    let _ = bot.answer_callback_query(query.id.clone()).await;
    let Some(style) = query.data.as_deref().and_then(parse_style) else {
        return Ok(());
    };
    let user_id = i64::try_from(query.from.id.0)?;
    let chat_id = query
        .message
        .as_ref()
        .map(|message| message.chat().id)
        .unwrap_or(ChatId(user_id));

    let Some(photo) = state.pending_photo(user_id) else {
        bot.send_message(chat_id, PHOTO_TIPS_MESSAGE).await?;
        return Ok(());
    };

    if !state.db.check_quota(user_id).await?.can_generate() {
        bot.send_message(chat_id, NO_QUOTA_MESSAGE).await?;
        return Ok(());
    }

    if let Some(wait) = generation_cooldown(user_id) {
        bot.send_message(
            chat_id,
            format!(
                "⏳ Please wait {} sec before the next avatar.",
                wait.as_secs().max(1)
            ),
        )
        .await?;
        return Ok(());
    }

    let params = state.quality.generation_params(user_id, style).await;
    let progress = bot
        .send_message(
            chat_id,
            format!(
                "🎨 Creating your {} avatar… about {} sec.",
                style.label(),
                params.estimated_seconds()
            ),
        )
        .await?;
    let handle = MessageHandle {
        chat_id: chat_id.0,
        message_id: progress.id.0,
    };

    let _upload = start_chat_action_heartbeat(bot.clone(), chat_id, ChatAction::UploadPhoto);
    let request_id = match log_provider_timing("submit", user_id, || {
        state.provider.submit(&photo.bytes, &params)
    })
    .await
    {
        Ok(request_id) => request_id,
        Err(err) => {
            error!("Generation submission failed for user {user_id}: {err}");
            bot.send_message(chat_id, SUBMISSION_FAILED_MESSAGE).await?;
            return Ok(());
        }
    };

    let context = GenerationContext::new(
        request_id.clone(),
        user_id,
        style,
        params.clone(),
        Some(handle),
    );
    let parked = match state.registry.insert(context) {
        Ok(parked) => parked,
        Err(RegistryError::Duplicate(id)) => {
            error!("Provider returned duplicate request id {id}");
            bot.send_message(chat_id, GENERIC_ERROR_MESSAGE).await?;
            return Ok(());
        }
    };
    info!(
        "Submitted generation {request_id} for user {user_id} (style={}, preset={:?})",
        style.key(),
        params.quality
    );

    state
        .statistics
        .record(
            user_id,
            StatsRecord {
                request_id,
                style,
                params,
                status: GenerationStatus::Started,
                error: None,
                elapsed: None,
            },
            0,
        )
        .await;
    state.reconciler.replay(parked).await;
    Ok(())
}

pub async fn retry_callback(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    let _ = bot.answer_callback_query(query.id.clone()).await;
    let user_id = i64::try_from(query.from.id.0)?;
    let chat_id = query
        .message
        .as_ref()
        .map(|message| message.chat().id)
        .unwrap_or(ChatId(user_id));

    if state.pending_photo(user_id).is_some() {
        send_style_keyboard(&bot, chat_id).await?;
    } else {
        bot.send_message(chat_id, PHOTO_TIPS_MESSAGE).await?;
    }
    Ok(())
}
