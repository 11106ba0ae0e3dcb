//! Shared harness for menu integration tests: an engine over an in-memory
//! store and a transport that records everything it is asked to do.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use menubot::menu::{
    CallbackToken, DownloadedFile, InlineButton, Incoming, Keyboard, MenuEngine, MenuError, MenuStore,
    MessageHandle, OutgoingMessage, Payload, Phrases, Transport, Viewer,
};

pub const ADMIN: i64 = 1;

#[derive(Default)]
struct Recorded {
    next_id: i32,
    sent: HashMap<MessageHandle, OutgoingMessage>,
    sent_order: Vec<MessageHandle>,
    deleted: Vec<MessageHandle>,
    copied: Vec<(i64, MessageHandle)>,
}

#[derive(Default)]
pub struct RecordingTransport {
    inner: Mutex<Recorded>,
    pub fail_sends: AtomicBool,
    pub fail_copies_to: Mutex<HashSet<i64>>,
    /// Sleep before every send, so concurrent events overlap.
    pub send_delay: Mutex<Option<Duration>>,
}

impl RecordingTransport {
    pub fn sent_count(&self) -> usize {
        self.inner.lock().unwrap().sent_order.len()
    }

    pub fn sent_handles(&self) -> Vec<MessageHandle> {
        self.inner.lock().unwrap().sent_order.clone()
    }

    pub fn deleted(&self) -> Vec<MessageHandle> {
        self.inner.lock().unwrap().deleted.clone()
    }

    pub fn copied(&self) -> Vec<(i64, MessageHandle)> {
        self.inner.lock().unwrap().copied.clone()
    }

    pub fn messages(&self, handles: &[MessageHandle]) -> Vec<OutgoingMessage> {
        let inner = self.inner.lock().unwrap();
        handles.iter().filter_map(|h| inner.sent.get(h).cloned()).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, chat_id: i64, message: &OutgoingMessage) -> Result<MessageHandle, MenuError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(MenuError::TransportFailure("send refused".to_string()));
        }
        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let handle = MessageHandle { chat_id, message_id: inner.next_id };
        inner.sent.insert(handle, message.clone());
        inner.sent_order.push(handle);
        Ok(handle)
    }

    async fn delete(&self, message: MessageHandle) -> Result<(), MenuError> {
        self.inner.lock().unwrap().deleted.push(message);
        Ok(())
    }

    async fn copy(&self, chat_id: i64, message: MessageHandle) -> Result<MessageHandle, MenuError> {
        if self.fail_copies_to.lock().unwrap().contains(&chat_id) {
            return Err(MenuError::TransportFailure("bot was blocked by the user".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        inner.copied.push((chat_id, message));
        inner.next_id += 1;
        Ok(MessageHandle { chat_id, message_id: inner.next_id })
    }

    async fn download(&self, file_id: &str) -> Result<DownloadedFile, MenuError> {
        Ok(DownloadedFile { filename: format!("{file_id}.png"), bytes: file_id.as_bytes().to_vec() })
    }
}

pub struct Harness {
    pub engine: MenuEngine,
    pub transport: Arc<RecordingTransport>,
    pub store: Arc<MenuStore>,
    next_message: AtomicI32,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MenuStore::open_in_memory().unwrap());
        store.root().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let engine = MenuEngine::new(
            store.clone(),
            transport.clone(),
            Arc::new(Phrases::default()),
            HashSet::from([ADMIN]),
        );
        Self { engine, transport, store, next_message: AtomicI32::new(10_000) }
    }

    pub fn event(&self, user: i64, payload: Payload) -> Incoming {
        let message_id = self.next_message.fetch_add(1, Ordering::SeqCst);
        Incoming {
            viewer: Viewer { id: user, username: Some(format!("user{user}")), full_name: format!("User {user}") },
            chat_id: user,
            message: Some(MessageHandle { chat_id: user, message_id }),
            payload,
        }
    }

    pub fn text(&self, user: i64, text: &str) -> Incoming {
        self.event(user, Payload::Text(text.to_string()))
    }

    pub fn press(&self, user: i64, token: CallbackToken) -> Incoming {
        Incoming { message: None, ..self.event(user, Payload::Callback(token.encode())) }
    }

    /// Messages of the user's visible dialog.
    pub async fn dialog(&self, user: i64) -> Vec<OutgoingMessage> {
        let session = self.engine.session(user).await.expect("no session");
        self.transport.messages(&session.dialog)
    }
}

pub fn reply_rows(dialog: &[OutgoingMessage]) -> Vec<Vec<String>> {
    match dialog.first().and_then(|m| m.keyboard.clone()) {
        Some(Keyboard::Reply(rows)) => rows,
        other => panic!("expected reply keyboard on carrier, got {other:?}"),
    }
}

pub fn inline_rows(dialog: &[OutgoingMessage]) -> Vec<Vec<InlineButton>> {
    match dialog.get(1).and_then(|m| m.keyboard.clone()) {
        Some(Keyboard::Inline(rows)) => rows,
        other => panic!("expected inline keyboard on content, got {other:?}"),
    }
}

pub fn inline_buttons(dialog: &[OutgoingMessage]) -> Vec<InlineButton> {
    match dialog.get(1).and_then(|m| m.keyboard.clone()) {
        Some(Keyboard::Inline(rows)) => rows.into_iter().flatten().collect(),
        other => panic!("expected inline keyboard on content, got {other:?}"),
    }
}
