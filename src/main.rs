use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::User;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

use menubot::config::Config;
use menubot::menu::{Incoming, MediaKind, MediaRef, MenuEngine, MenuError, MenuStore, MessageHandle, Payload, Viewer};
use menubot::telegram::TelegramClient;
use menubot::telegram_log::TelegramLogLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "menubot.json".to_string());
    let config = Config::load(&config_path)?;

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("menubot.log"))?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(TelegramLogLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting menubot...");
    info!("Loaded config from {config_path}");
    info!("Admin IDs: {:?}", config.admin_ids);

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(MenuStore::open(&config.database_path)?);
    store.root()?;

    let transport = Arc::new(TelegramClient::new(bot.clone()));
    let engine = Arc::new(MenuEngine::new(
        store,
        transport,
        Arc::new(config.phrases.clone()),
        config.admin_chat_ids(),
    ));

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn viewer(user: &User) -> Viewer {
    Viewer {
        id: user.id.0 as i64,
        username: user.username.clone(),
        full_name: user.full_name(),
    }
}

/// Strip a leading slash command (with an optional `@botname`).
fn command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    Some(name.split('@').next().unwrap_or(name))
}

fn payload(msg: &Message) -> Payload {
    if let Some(text) = msg.text() {
        return Payload::Text(text.to_string());
    }
    let media = |kind, file_id: &str, file_name: Option<&String>| {
        Payload::Media(MediaRef { kind, file_id: file_id.to_string(), file_name: file_name.cloned() })
    };
    // Animations also carry a document; check them first.
    if let Some(animation) = msg.animation() {
        return media(MediaKind::Animation, &animation.file.id.0, animation.file_name.as_ref());
    }
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return media(MediaKind::Photo, &photo.file.id.0, None);
    }
    if let Some(video) = msg.video() {
        return media(MediaKind::Video, &video.file.id.0, video.file_name.as_ref());
    }
    if let Some(document) = msg.document() {
        return media(MediaKind::Document, &document.file.id.0, document.file_name.as_ref());
    }
    Payload::Other
}

fn log_result(user_id: i64, result: Result<(), MenuError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_not_found() => warn!("User {}: {}", user_id, e),
        Err(e) if e.is_recoverable() => debug!("User {}: {}", user_id, e),
        Err(e) => error!("User {}: {}", user_id, e),
    }
}

async fn handle_message(bot: Bot, msg: Message, engine: Arc<MenuEngine>) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };

    let incoming = Incoming {
        viewer: viewer(user),
        chat_id: msg.chat.id.0,
        message: Some(MessageHandle { chat_id: msg.chat.id.0, message_id: msg.id.0 }),
        payload: payload(&msg),
    };
    let user_id = incoming.viewer.id;

    let result = match msg.text().and_then(command) {
        Some("start") => engine.open_user(&incoming).await,
        Some("admin") => match engine.open_admin(&incoming).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                bot.send_message(msg.chat.id, "Access denied.").await.ok();
                Ok(())
            }
            Err(e) => Err(e),
        },
        Some("mail") => match engine.start_broadcast(&incoming).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                bot.send_message(msg.chat.id, "Access denied.").await.ok();
                Ok(())
            }
            Err(e) => Err(e),
        },
        _ => engine.handle(&incoming).await,
    };

    log_result(user_id, result);
    Ok(())
}

async fn handle_callback(bot: Bot, query: CallbackQuery, engine: Arc<MenuEngine>) -> ResponseResult<()> {
    // Stop the client's loading spinner whatever happens next.
    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
        debug!("Failed to answer callback query: {e}");
    }

    let Some(data) = query.data.clone() else {
        return Ok(());
    };
    let chat_id = query
        .regular_message()
        .map(|m| m.chat.id.0)
        .unwrap_or(query.from.id.0 as i64);

    let incoming = Incoming {
        viewer: viewer(&query.from),
        chat_id,
        // The pressed message belongs to the tracked dialog already.
        message: None,
        payload: Payload::Callback(data),
    };

    log_result(incoming.viewer.id, engine.handle(&incoming).await);
    Ok(())
}
