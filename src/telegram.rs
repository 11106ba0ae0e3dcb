//! Telegram client using teloxide.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton, KeyboardMarkup, MessageId,
    ReplyMarkup,
};
use tracing::{debug, info, warn};

use crate::menu::{
    DownloadedFile, InlineButton, Keyboard, MediaKind, MenuError, MessageHandle, OutgoingMessage, Transport,
};

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Telegram's limits on message text and media captions.
const MAX_TEXT_CHARS: usize = 4096;
const MAX_CAPTION_CHARS: usize = 1024;

/// Cut `text` to at most `limit` chars, ending with an ellipsis when cut.
fn fit(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit - 1).collect();
    cut.push('…');
    cut
}

fn failure(what: &str, e: impl std::fmt::Display) -> MenuError {
    let msg = format!("Failed to {what}: {e}");
    warn!("{}", msg);
    MenuError::TransportFailure(msg)
}

/// Convert a keyboard layout to Telegram markup. Returns `None` for an empty
/// inline keyboard, which Telegram would reject.
fn markup(keyboard: &Keyboard) -> Option<ReplyMarkup> {
    match keyboard {
        Keyboard::Reply(rows) => {
            let rows = rows
                .iter()
                .map(|row| row.iter().map(KeyboardButton::new).collect::<Vec<_>>())
                .collect::<Vec<_>>();
            Some(KeyboardMarkup::new(rows).resize_keyboard().into())
        }
        Keyboard::Inline(rows) => {
            let rows = rows
                .iter()
                .map(|row| row.iter().filter_map(inline_button).collect::<Vec<_>>())
                .filter(|row| !row.is_empty())
                .collect::<Vec<_>>();
            if rows.is_empty() {
                None
            } else {
                Some(InlineKeyboardMarkup::new(rows).into())
            }
        }
    }
}

fn inline_button(button: &InlineButton) -> Option<InlineKeyboardButton> {
    match button {
        InlineButton::Callback { label, token } => Some(InlineKeyboardButton::callback(label, token)),
        InlineButton::Link { label, url } => match url::Url::parse(url) {
            Ok(url) => Some(InlineKeyboardButton::url(label, url)),
            Err(e) => {
                warn!("Skipping link button {:?} with bad url {}: {}", label, url, e);
                None
            }
        },
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send(&self, chat_id: i64, message: &OutgoingMessage) -> Result<MessageHandle, MenuError> {
        let chat = ChatId(chat_id);
        let markup = message.keyboard.as_ref().and_then(markup);
        let caption = Some(message.text.as_str())
            .filter(|t| !t.is_empty())
            .map(|t| fit(t, MAX_CAPTION_CHARS));

        let sent = match &message.media {
            None => {
                let mut request = self.bot.send_message(chat, fit(&message.text, MAX_TEXT_CHARS));
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                request.await
            }
            Some(media) => {
                debug!("Sending {:?} {} to chat {} ({} bytes)", media.kind, media.filename, chat_id, media.bytes.len());
                let file = InputFile::memory(media.bytes.clone()).file_name(media.filename.clone());
                match media.kind {
                    MediaKind::Photo => {
                        let mut request = self.bot.send_photo(chat, file);
                        if let Some(caption) = caption {
                            request = request.caption(caption);
                        }
                        if let Some(markup) = markup {
                            request = request.reply_markup(markup);
                        }
                        request.await
                    }
                    MediaKind::Animation => {
                        let mut request = self.bot.send_animation(chat, file);
                        if let Some(caption) = caption {
                            request = request.caption(caption);
                        }
                        if let Some(markup) = markup {
                            request = request.reply_markup(markup);
                        }
                        request.await
                    }
                    MediaKind::Video => {
                        let mut request = self.bot.send_video(chat, file);
                        if let Some(caption) = caption {
                            request = request.caption(caption);
                        }
                        if let Some(markup) = markup {
                            request = request.reply_markup(markup);
                        }
                        request.await
                    }
                    MediaKind::Document => {
                        let mut request = self.bot.send_document(chat, file);
                        if let Some(caption) = caption {
                            request = request.caption(caption);
                        }
                        if let Some(markup) = markup {
                            request = request.reply_markup(markup);
                        }
                        request.await
                    }
                }
            }
        };

        let sent = sent.map_err(|e| failure("send", e))?;
        Ok(MessageHandle { chat_id, message_id: sent.id.0 })
    }

    async fn delete(&self, message: MessageHandle) -> Result<(), MenuError> {
        self.bot
            .delete_message(ChatId(message.chat_id), MessageId(message.message_id))
            .await
            .map_err(|e| MenuError::TransportFailure(format!("Failed to delete message: {e}")))?;
        Ok(())
    }

    async fn copy(&self, chat_id: i64, message: MessageHandle) -> Result<MessageHandle, MenuError> {
        let copied = self
            .bot
            .copy_message(ChatId(chat_id), ChatId(message.chat_id), MessageId(message.message_id))
            .await
            .map_err(|e| MenuError::TransportFailure(format!("Failed to copy message: {e}")))?;
        Ok(MessageHandle { chat_id, message_id: copied.0 })
    }

    async fn download(&self, file_id: &str) -> Result<DownloadedFile, MenuError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| failure("get file info", e))?;

        let mut bytes = Vec::new();
        self.bot
            .download_file(&file.path, &mut bytes)
            .await
            .map_err(|e| failure("download file", e))?;

        let filename = file.path.rsplit('/').next().unwrap_or(&file.path).to_string();
        info!("📥 Downloaded {} ({} bytes)", filename, bytes.len());
        Ok(DownloadedFile { filename, bytes })
    }
}
