//! Tracing layer that mirrors bot logs into a Telegram chat.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Telegram's message limit is 4096 chars; leave room for the ellipsis.
const MAX_LOG_CHARS: usize = 4000;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BATCH: usize = 50;

enum LogMessage {
    /// WARN/ERROR, sent right away.
    Urgent(String),
    /// INFO, batched.
    Info(String),
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl TelegramLogLayer {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut batch: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(LogMessage::Urgent(text)) => send_log(&bot, chat_id, &text).await,
                        Some(LogMessage::Info(text)) => {
                            batch.push(text);
                            if batch.len() >= MAX_BATCH {
                                flush(&bot, chat_id, &mut batch).await;
                            }
                        }
                        None => {
                            flush(&bot, chat_id, &mut batch).await;
                            break;
                        }
                    },
                    _ = interval.tick() => flush(&bot, chat_id, &mut batch).await,
                }
            }
        });

        Self { tx }
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    if let Err(e) = bot.send_message(chat_id, truncate(text)).await {
        // Not through tracing, that would feed back into this layer.
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let combined = batch.join("\n");
    batch.clear();
    send_log(bot, chat_id, &combined).await;
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_LOG_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(MAX_LOG_CHARS).collect();
    format!("{truncated}...")
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

/// Classify an event, or `None` if it should stay out of the chat.
fn classify(level: Level, target: &str, message: String) -> Option<LogMessage> {
    // Polling noise from the HTTP client, and DEBUG/TRACE.
    if level > Level::INFO || target.starts_with("teloxide") || target.starts_with("reqwest") {
        return None;
    }
    Some(match level {
        Level::ERROR => LogMessage::Urgent(format!("❌ {message}")),
        Level::WARN => LogMessage::Urgent(format!("⚠️ {message}")),
        _ => LogMessage::Info(message),
    })
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::INFO {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let Some(msg) = classify(*metadata.level(), metadata.target(), visitor.message) else {
            return;
        };
        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_levels() {
        assert!(matches!(
            classify(Level::ERROR, "menubot", "boom".into()),
            Some(LogMessage::Urgent(m)) if m == "❌ boom"
        ));
        assert!(matches!(
            classify(Level::WARN, "menubot::menu", "hm".into()),
            Some(LogMessage::Urgent(m)) if m == "⚠️ hm"
        ));
        assert!(matches!(classify(Level::INFO, "menubot", "ok".into()), Some(LogMessage::Info(_))));
        assert!(classify(Level::DEBUG, "menubot", "x".into()).is_none());
    }

    #[test]
    fn test_client_noise_is_dropped() {
        assert!(classify(Level::ERROR, "teloxide::update_listeners", "timeout".into()).is_none());
        assert!(classify(Level::WARN, "reqwest::connect", "reset".into()).is_none());
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let short = "привет";
        assert_eq!(truncate(short), short);

        let long = "я".repeat(MAX_LOG_CHARS + 10);
        let cut = truncate(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), MAX_LOG_CHARS + 3);
    }
}
