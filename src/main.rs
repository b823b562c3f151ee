use std::error::Error;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio::net::TcpListener;
use tracing::{error, info};

mod config;
mod db;
mod generation;
mod handlers;
mod provider;
mod services;
mod state;
mod styles;
mod utils;
mod webhook;

use config::{Config, CONFIG};
use db::Database;
use handlers::commands::{self, CREATE_AVATAR_BUTTON, QUALITY_CALLBACK_PREFIX};
use handlers::conversation::{self, STYLE_CALLBACK_PREFIX};
use handlers::media::has_image;
use services::notifications::RETRY_CALLBACK;
use state::AppState;
use utils::logging::init_logging;
use webhook::{router, serve, WebhookState};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Avatar,
    Quality,
    Stats,
    Notifications,
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    // Surface configuration errors before the lazy global is touched.
    Config::load()?;
    let _guards = init_logging(&CONFIG.log_level);

    let bot = Bot::new(CONFIG.bot_token.clone());
    info!("Starting avatar bot");

    let db = Database::init(&CONFIG.database_url, CONFIG.default_image_quota).await?;
    db.health_check().await?;
    let state = AppState::new(bot.clone(), db, &CONFIG);

    let listener = TcpListener::bind(CONFIG.webhook_bind_address()?).await?;
    let webhook_state = WebhookState::new(
        state.reconciler.clone(),
        &CONFIG.webhook_secret,
        &CONFIG.webhook_signature_header,
    )?;
    let app = router(
        webhook_state,
        &CONFIG.webhook_path,
        CONFIG.webhook_max_body_bytes,
    );
    info!("Provider callbacks go to {}", CONFIG.callback_url());
    tokio::spawn(async move {
        if let Err(err) = serve(listener, app).await {
            error!("Webhook server failed: {err}");
        }
    });

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(
            dptree::filter(|msg: Message| msg.text() == Some(CREATE_AVATAR_BUTTON))
                .endpoint(handle_create_button),
        )
        .branch(dptree::filter(|msg: Message| has_image(&msg)).endpoint(handle_photo))
        .endpoint(ignore_message);

    let callback_state = state.clone();
    let callback_handler =
        Update::filter_callback_query().endpoint(move |bot: Bot, query: CallbackQuery| {
            let state = callback_state.clone();
            async move { handle_callback_query(bot, state, query).await }
        });

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    match command {
        Command::Start => commands::start_handler(bot, state, message).await?,
        Command::Help => commands::help_handler(bot, message).await?,
        Command::Avatar => commands::avatar_handler(bot, state, message).await?,
        Command::Quality => commands::quality_handler(bot, state, message).await?,
        Command::Stats => commands::stats_handler(bot, state, message).await?,
        Command::Notifications => commands::notifications_handler(bot, state, message).await?,
    }
    Ok(())
}

async fn handle_create_button(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    commands::avatar_handler(bot, state, message).await?;
    Ok(())
}

async fn handle_photo(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = conversation::photo_handler(bot, state, message).await {
            error!("photo handler failed: {err}");
        }
    });
    Ok(())
}

async fn handle_callback_query(bot: Bot, state: AppState, query: CallbackQuery) -> HandlerResult {
    let Some(data) = query.data.clone() else {
        return Ok(());
    };
    if data.starts_with(STYLE_CALLBACK_PREFIX) {
        tokio::spawn(async move {
            if let Err(err) = conversation::style_callback(bot, state, query).await {
                error!("style callback failed: {err}");
            }
        });
        return Ok(());
    }
    if data.starts_with(QUALITY_CALLBACK_PREFIX) {
        tokio::spawn(async move {
            if let Err(err) = commands::quality_callback(bot, state, query).await {
                error!("quality callback failed: {err}");
            }
        });
        return Ok(());
    }
    if data == RETRY_CALLBACK {
        tokio::spawn(async move {
            if let Err(err) = conversation::retry_callback(bot, state, query).await {
                error!("retry callback failed: {err}");
            }
        });
    }
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}
