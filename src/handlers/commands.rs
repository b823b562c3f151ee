use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{KeyboardButton, KeyboardMarkup};
use tracing::warn;

use crate::config::{NO_QUOTA_MESSAGE, PHOTO_TIPS_MESSAGE, WELCOME_MESSAGE};
use crate::services::chat::ActionButton;
use crate::services::quality::available_presets;
use crate::services::statistics::format_user_summary;
use crate::services::UserStore;
use crate::state::AppState;
use crate::styles::{QualityPreset, Style};
use crate::utils::telegram::{inline_keyboard, with_telegram_retry};
use crate::utils::timing::start_command_timer;

pub const CREATE_AVATAR_BUTTON: &str = "🎨 Create avatar";
pub const QUALITY_CALLBACK_PREFIX: &str = "quality:";

fn sender(message: &Message) -> Option<(i64, Option<String>)> {
    let user = message.from.as_ref()?;
    let user_id = i64::try_from(user.id.0).ok()?;
    Some((user_id, user.username.clone()))
}

fn main_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(CREATE_AVATAR_BUTTON)]]).resize_keyboard()
}

pub fn help_text() -> String {
    let styles = Style::ALL
        .iter()
        .map(|style| format!("• {}", style.label()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "🤖 How to use the bot:\n\n\
         1. Press \"{CREATE_AVATAR_BUTTON}\" or send /avatar\n\
         2. Send a photo\n\
         3. Pick a style\n\
         4. Wait for the result\n\n\
         Commands:\n\
         /start - start over\n\
         /help - this message\n\
         /avatar - create an avatar\n\
         /quality - choose generation quality\n\
         /stats - your statistics\n\
         /notifications - toggle progress notifications\n\n\
         Styles:\n{styles}"
    )
}

pub fn quality_actions(current: QualityPreset) -> Vec<ActionButton> {
    available_presets()
        .into_iter()
        .map(|info| {
            let marker = if info.preset == current { "✅ " } else { "" };
            ActionButton::new(
                format!("{marker}{} · ~{} sec", info.preset, info.estimated_seconds),
                format!("{QUALITY_CALLBACK_PREFIX}{}", info.preset.key()),
            )
        })
        .collect()
}

fn quality_text(current: QualityPreset) -> String {
    let mut text = format!("⚙️ Generation quality (current: {current})\n");
    for info in available_presets() {
        text.push_str(&format!(
            "\n• {}: {} steps, ~{} sec. {}",
            info.preset, info.steps, info.estimated_seconds, info.description
        ));
    }
    text
}

pub async fn start_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let mut timer = start_command_timer("start", &message);
    let Some((user_id, username)) = sender(&message) else {
        return Ok(());
    };
    state.db.register_user(user_id, username.as_deref()).await?;
    let quota = state.db.check_quota(user_id).await?;

    let text = format!("{WELCOME_MESSAGE}\n\n✨ Images left: {}", quota.remaining);
    with_telegram_retry("send_message", || {
        let request = bot
            .send_message(message.chat.id, text.clone())
            .reply_markup(main_keyboard());
        async move { request.await }
    })
    .await?;
    timer.complete("success", None);
    Ok(())
}

pub async fn help_handler(bot: Bot, message: Message) -> Result<()> {
    bot.send_message(message.chat.id, help_text()).await?;
    Ok(())
}

pub async fn avatar_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let mut timer = start_command_timer("avatar", &message);
    let Some((user_id, username)) = sender(&message) else {
        return Ok(());
    };
    state.db.register_user(user_id, username.as_deref()).await?;
    let quota = state.db.check_quota(user_id).await?;
    if !quota.can_generate() {
        bot.send_message(message.chat.id, NO_QUOTA_MESSAGE).await?;
        timer.complete("no_quota", None);
        return Ok(());
    }
    bot.send_message(message.chat.id, PHOTO_TIPS_MESSAGE).await?;
    timer.complete("success", None);
    Ok(())
}

pub async fn quality_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some((user_id, _)) = sender(&message) else {
        return Ok(());
    };
    let current = state.quality.preset_for(user_id).await;
    bot.send_message(message.chat.id, quality_text(current))
        .reply_markup(inline_keyboard(&quality_actions(current)))
        .await?;
    Ok(())
}

pub async fn stats_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let mut timer = start_command_timer("stats", &message);
    let Some((user_id, _)) = sender(&message) else {
        return Ok(());
    };
    let stats = state.db.user_statistics(user_id).await?;
    let quota = state.db.check_quota(user_id).await?;
    let text = format!(
        "{}\n\n✨ Images left: {}",
        format_user_summary(&stats),
        quota.remaining
    );
    bot.send_message(message.chat.id, text).await?;
    timer.complete("success", None);
    Ok(())
}

pub async fn notifications_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some((user_id, username)) = sender(&message) else {
        return Ok(());
    };
    state.db.register_user(user_id, username.as_deref()).await?;
    let enabled = state.db.toggle_notifications(user_id).await?;
    let text = if enabled {
        "🔔 Progress notifications are on."
    } else {
        "🔕 Progress notifications are off. Results will still be delivered."
    };
    bot.send_message(message.chat.id, text).await?;
    Ok(())
}

pub async fn quality_callback(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    let _ = bot.answer_callback_query(query.id.clone()).await;
    let Some(preset) = query
        .data
        .as_deref()
        .and_then(|data| data.strip_prefix(QUALITY_CALLBACK_PREFIX))
        .and_then(QualityPreset::from_key)
    else {
        return Ok(());
    };
    let user_id = i64::try_from(query.from.id.0)?;
    state.quality.set_preset(user_id, preset).await?;

    let text = format!(
        "✅ Quality set to {preset}. Each avatar takes about {} sec.",
        preset.estimated_seconds()
    );
    match &query.message {
        Some(message) => {
            if let Err(err) = bot
                .edit_message_text(message.chat().id, message.id(), text.clone())
                .await
            {
                warn!("Failed to update quality message: {err}");
                bot.send_message(message.chat().id, text).await?;
            }
        }
        None => {
            bot.send_message(ChatId(user_id), text).await?;
        }
    }
    Ok(())
}
