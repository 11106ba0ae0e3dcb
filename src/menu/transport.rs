//! Messaging platform seam.
//!
//! The menu engine only talks to the platform through [`Transport`]. The
//! teloxide implementation lives in `crate::telegram`.

use async_trait::async_trait;

use super::error::MenuError;

/// A sent message that can later be deleted or copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i32,
}

/// How an attached file is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Animation,
    Video,
    Document,
}

impl MediaKind {
    /// Pick the send method from the filename suffix.
    pub fn for_filename(filename: &str) -> Self {
        let lower = filename.to_lowercase();
        if lower.ends_with(".png") || lower.ends_with(".jpg") {
            MediaKind::Photo
        } else if lower.ends_with(".gif") {
            MediaKind::Animation
        } else if lower.ends_with(".mp4") {
            MediaKind::Video
        } else {
            MediaKind::Document
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub kind: MediaKind,
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineButton {
    Callback { label: String, token: String },
    Link { label: String, url: String },
}

impl InlineButton {
    pub fn label(&self) -> &str {
        match self {
            InlineButton::Callback { label, .. } | InlineButton::Link { label, .. } => label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// Persistent keyboard under the input field; pressing sends the label as text.
    Reply(Vec<Vec<String>>),
    /// Buttons attached to the message itself.
    Inline(Vec<Vec<InlineButton>>),
}

/// One message to send. With `media`, `text` becomes the caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub media: Option<Media>,
    pub keyboard: Option<Keyboard>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), media: None, keyboard: None }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.media = Some(media);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, chat_id: i64, message: &OutgoingMessage) -> Result<MessageHandle, MenuError>;

    async fn delete(&self, message: MessageHandle) -> Result<(), MenuError>;

    /// Re-send an existing message to another chat.
    async fn copy(&self, chat_id: i64, message: MessageHandle) -> Result<MessageHandle, MenuError>;

    async fn download(&self, file_id: &str) -> Result<DownloadedFile, MenuError>;
}
