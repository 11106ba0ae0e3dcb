//! Menu engine - drives per-user sessions over the menu trees.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::codec::Role;
use super::error::{MenuError, MenuResult};
use super::phrases::Phrases;
use super::render::{interpolate, render_dialog, replace_dialog};
use super::session::{Command, Incoming, Payload, Session, SessionState, route};
use super::transport::{MessageHandle, OutgoingMessage, Transport};
use super::tree::{MenuStore, NodeId};
use super::workflow::{Edit, Flow, Step};

type SessionMap = std::sync::Mutex<HashMap<i64, Arc<Mutex<Session>>>>;

/// Outcome of a bulk broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// The menu engine.
///
/// Events of one user are processed one at a time; different users run
/// concurrently.
pub struct MenuEngine {
    store: Arc<MenuStore>,
    transport: Arc<dyn Transport>,
    phrases: Arc<Phrases>,
    admins: HashSet<i64>,
    sessions: SessionMap,
}

impl MenuEngine {
    pub fn new(store: Arc<MenuStore>, transport: Arc<dyn Transport>, phrases: Arc<Phrases>, admins: HashSet<i64>) -> Self {
        Self { store, transport, phrases, admins, sessions: SessionMap::default() }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }

    pub fn store(&self) -> &MenuStore {
        &self.store
    }

    /// Snapshot of a user's session, if any.
    pub async fn session(&self, user_id: i64) -> Option<Session> {
        let session = self.sessions().get(&user_id).cloned()?;
        let guard = session.lock().await;
        Some(guard.clone())
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Arc<Mutex<Session>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session handle for a user, created at the root in user role.
    fn session_handle(&self, user_id: i64) -> MenuResult<Arc<Mutex<Session>>> {
        if let Some(session) = self.sessions().get(&user_id) {
            return Ok(session.clone());
        }
        let root = self.store.root()?;
        let mut sessions = self.sessions();
        let session = sessions
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(Session::at(Role::User, &root))));
        Ok(session.clone())
    }

    fn register(&self, incoming: &Incoming) -> MenuResult<()> {
        let viewer = &incoming.viewer;
        self.store.register_user(viewer.id, viewer.username.as_deref(), &viewer.full_name)
    }

    // ==================== ENTRY POINTS ====================

    /// `/start`: open the user tree at the root.
    pub async fn open_user(&self, incoming: &Incoming) -> MenuResult<()> {
        self.register(incoming)?;
        info!("👋 {} opened the menu", incoming.viewer.id);
        self.open_root(incoming, Role::User).await
    }

    /// `/admin`: open the admin tree at the root. Returns `false` for users
    /// outside the allowlist.
    pub async fn open_admin(&self, incoming: &Incoming) -> MenuResult<bool> {
        self.register(incoming)?;
        if !self.is_admin(incoming.viewer.id) {
            warn!("Refused /admin for non-admin {}", incoming.viewer.id);
            return Ok(false);
        }
        info!("🔧 Admin {} opened the editor", incoming.viewer.id);
        self.open_root(incoming, Role::Admin).await?;
        Ok(true)
    }

    /// `/mail`: ask an admin for the message to broadcast. Returns `false`
    /// for users outside the allowlist.
    pub async fn start_broadcast(&self, incoming: &Incoming) -> MenuResult<bool> {
        self.register(incoming)?;
        if !self.is_admin(incoming.viewer.id) {
            warn!("Refused /mail for non-admin {}", incoming.viewer.id);
            return Ok(false);
        }

        let handle = self.session_handle(incoming.viewer.id)?;
        let mut session = handle.lock().await;
        if session.role != Role::Admin {
            let root = self.store.root()?;
            let dialog = std::mem::take(&mut session.dialog);
            *session = Session { dialog, ..Session::at(Role::Admin, &root) };
        }
        self.start_flow(&mut session, incoming, Flow::Broadcast).await?;
        Ok(true)
    }

    async fn open_root(&self, incoming: &Incoming, role: Role) -> MenuResult<()> {
        let root = self.store.root()?;
        let handle = self.session_handle(incoming.viewer.id)?;
        let mut session = handle.lock().await;

        // Entry commands cancel any waiting flow.
        session.role = role;
        session.state = SessionState::Navigating;
        self.show(&mut session, incoming, root.id, root.inline_id, Vec::new()).await
    }

    // ==================== EVENTS ====================

    /// Process one event from a user.
    ///
    /// Recoverable errors (see [`MenuError::is_recoverable`]) are returned
    /// after the session has been put back into a consistent state.
    pub async fn handle(&self, incoming: &Incoming) -> MenuResult<()> {
        self.register(incoming)?;

        let handle = self.session_handle(incoming.viewer.id)?;
        let mut session = handle.lock().await;

        let result = match std::mem::replace(&mut session.state, SessionState::Navigating) {
            SessionState::Navigating => self.navigate(&mut session, incoming).await,
            SessionState::SubFlow(flow) => self.continue_flow(&mut session, incoming, flow).await,
        };

        if let Err(e) = &result {
            match e {
                MenuError::NotFound { .. } => {
                    warn!("{} for user {}, re-rendering", e, incoming.viewer.id);
                    if let Err(e) = self.recover(&mut session, incoming).await {
                        debug!("Re-render after NotFound failed: {}", e);
                    }
                }
                MenuError::MalformedToken(_) => debug!("Dropping {}", e),
                MenuError::UnsupportedContent(_) => debug!("Waiting for valid input: {}", e),
                MenuError::Rejected(_) => info!("Edit {}", e),
                MenuError::TransportFailure(_) | MenuError::Storage(_) => {}
            }
        }
        result
    }

    async fn navigate(&self, session: &mut Session, incoming: &Incoming) -> MenuResult<()> {
        let view = self.store.reply_view(session.reply_node)?;
        let command = route(session.role, &incoming.payload, &view, &self.phrases)?;
        debug!("User {} -> {:?}", incoming.viewer.id, command);

        let reply = session.reply_node;
        let inline = session.inline_node;
        match command {
            Command::Ignore => Ok(()),
            Command::OpenReply(id) => {
                let node = self.store.reply_node(id)?;
                self.show(session, incoming, node.id, node.inline_id, Vec::new()).await
            }
            Command::Back => {
                let Some(parent) = view.node.parent_id else {
                    return Ok(());
                };
                let parent = self.store.reply_node(parent)?;
                self.show(session, incoming, parent.id, parent.inline_id, Vec::new()).await
            }
            Command::RemoveReply => {
                let parent = self.store.reply_node(self.store.delete_reply_subtree(reply)?)?;
                self.show(session, incoming, parent.id, parent.inline_id, Vec::new()).await
            }
            Command::ToggleReply => {
                self.store.toggle_reply_alignment(reply)?;
                self.show(session, incoming, reply, inline, Vec::new()).await
            }
            Command::OpenInline(id) => {
                if self.store.inline_node(id)?.is_link() {
                    return Err(MenuError::Rejected("links are not menus"));
                }
                self.show(session, incoming, reply, id, Vec::new()).await
            }
            Command::RemoveInline(id) => {
                let parent = self.store.delete_inline_subtree(id)?;
                self.show(session, incoming, reply, parent, Vec::new()).await
            }
            Command::ToggleInline(id) => {
                self.store.toggle_inline_alignment(id)?;
                self.show(session, incoming, reply, id, Vec::new()).await
            }
            Command::RemoveFile(id) => {
                if self.store.remove_file(id)? {
                    info!("🗑️ Removed file of inline node {}", id);
                }
                self.show(session, incoming, reply, id, Vec::new()).await
            }
            Command::StartFlow(flow) => self.start_flow(session, incoming, flow).await,
        }
    }

    async fn start_flow(&self, session: &mut Session, incoming: &Incoming, flow: Flow) -> MenuResult<()> {
        // Targets of inline flows must still exist.
        match &flow {
            Flow::AddInlineButton { parent }
            | Flow::AddLink { parent, .. }
            | Flow::RemoveLink { parent } => {
                self.store.inline_node(*parent)?;
            }
            Flow::EditText { node }
            | Flow::EditName { node }
            | Flow::EditBackLabel { node }
            | Flow::AttachFile { node } => {
                self.store.inline_node(*node)?;
            }
            Flow::AddReplyButton | Flow::RenameReplyNode | Flow::EditReplyBackLabel | Flow::Broadcast => {}
        }

        debug!("User {} started {}", incoming.viewer.id, flow.name());
        self.prompt(session, incoming, &flow).await?;
        session.state = SessionState::SubFlow(flow);
        Ok(())
    }

    async fn prompt(&self, session: &mut Session, incoming: &Incoming, flow: &Flow) -> MenuResult<()> {
        let message = OutgoingMessage::text(interpolate(flow.prompt(&self.phrases), &incoming.viewer));
        let sent = replace_dialog(self.transport.as_ref(), incoming.chat_id, stale(session, incoming), &[message]).await?;
        session.dialog = sent;
        Ok(())
    }

    async fn continue_flow(&self, session: &mut Session, incoming: &Incoming, flow: Flow) -> MenuResult<()> {
        if let Payload::Callback(_) = incoming.payload {
            debug!("Ignoring button press during {}", flow.name());
            session.state = SessionState::SubFlow(flow);
            return Ok(());
        }

        let step = match flow.clone().accept(&incoming.payload) {
            Ok(step) => step,
            Err(e) => {
                // Stay in the flow; the rejected input goes with the next dialog.
                session.state = SessionState::SubFlow(flow);
                session.dialog.extend(incoming.message);
                return Err(e);
            }
        };

        match step {
            Step::Continue(next) => {
                self.prompt(session, incoming, &next).await?;
                session.state = SessionState::SubFlow(next);
                Ok(())
            }
            Step::Apply(Edit::Broadcast) => self.broadcast(session, incoming).await,
            Step::Apply(edit) => {
                let target = edit.inline_target();
                self.apply(session, edit).await?;
                let reply = self.store.reply_node(session.reply_node)?;
                let inline = target.unwrap_or(reply.inline_id);
                self.show(session, incoming, reply.id, inline, Vec::new()).await
            }
        }
    }

    /// Persist a validated edit.
    async fn apply(&self, session: &Session, edit: Edit) -> MenuResult<()> {
        let store = &self.store;
        let reply = session.reply_node;
        match edit {
            Edit::AddReplyButton { name } => {
                let node = store.create_reply_child(reply, &name)?;
                info!("➕ Added reply button {} ({:?}) under {}", node.id, name, reply);
            }
            Edit::RenameReplyNode { name } => store.set_reply_name(reply, &name)?,
            Edit::SetReplyBackLabel { label } => store.set_reply_back_label(reply, &label)?,
            Edit::AddInlineButton { parent, name } => {
                let node = store.create_inline_child(parent, &name, None)?;
                info!("➕ Added inline button {} ({:?}) under {}", node.id, name, parent);
            }
            Edit::AddLink { parent, name, url } => {
                let node = store.create_inline_child(parent, &name, Some(&url))?;
                info!("🔗 Added link {} ({:?} -> {}) under {}", node.id, name, url, parent);
            }
            Edit::RemoveLink { parent, url } => {
                let removed = store.remove_links(parent, &url)?;
                info!("🔗 Removed {} link(s) to {} under {}", removed, url, parent);
            }
            Edit::SetText { node, text } => store.set_inline_text(node, &text)?,
            Edit::SetName { node, name } => store.set_inline_name(node, &name)?,
            Edit::SetBackLabel { node, label } => store.set_inline_back_label(node, &label)?,
            Edit::AttachFile { node, media } => {
                store.inline_node(node)?;
                let file = self.transport.download(&media.file_id).await?;
                let filename = media.file_name.unwrap_or(file.filename);
                store.attach_file(node, &filename, &file.bytes)?;
            }
            Edit::Broadcast => {}
        }
        Ok(())
    }

    async fn broadcast(&self, session: &mut Session, incoming: &Incoming) -> MenuResult<()> {
        let Some(source) = incoming.message else {
            session.state = SessionState::SubFlow(Flow::Broadcast);
            return Err(MenuError::UnsupportedContent(Flow::Broadcast.name()));
        };

        let started = self
            .transport
            .send(incoming.chat_id, &OutgoingMessage::text(self.phrases.admin.broadcast_started.clone()))
            .await?;
        session.dialog.push(started);

        let report = self.copy_to_all(source, incoming.viewer.id).await?;
        info!("📣 Broadcast by {}: {} sent, {} failed", incoming.viewer.id, report.sent, report.failed);

        let summary = self.phrases.admin.broadcast_sent.replace("{count}", &report.sent.to_string());
        let (reply, inline) = (session.reply_node, session.inline_node);
        self.show(session, incoming, reply, inline, vec![OutgoingMessage::text(summary)]).await
    }

    /// Copy `source` to every registered user except its author. A failed
    /// copy is counted and the batch goes on.
    pub async fn copy_to_all(&self, source: MessageHandle, author: i64) -> MenuResult<BroadcastReport> {
        let mut report = BroadcastReport::default();
        for user_id in self.store.user_ids()? {
            if user_id == author {
                continue;
            }
            match self.transport.copy(user_id, source).await {
                Ok(_) => report.sent += 1,
                Err(e) => {
                    debug!("Broadcast to {} failed: {}", user_id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    // ==================== RENDERING ====================

    /// Render `reply`/`inline` as the new dialog and move the session there.
    /// The session only moves once the dialog is on screen.
    async fn show(
        &self,
        session: &mut Session,
        incoming: &Incoming,
        reply: NodeId,
        inline: NodeId,
        extra: Vec<OutgoingMessage>,
    ) -> MenuResult<()> {
        let reply_view = self.store.reply_view(reply)?;
        let inline_view = self.store.inline_view(inline)?;

        let mut messages = render_dialog(session.role, &reply_view, &inline_view, &self.phrases, &incoming.viewer);
        messages.extend(extra);

        let sent = replace_dialog(self.transport.as_ref(), incoming.chat_id, stale(session, incoming), &messages).await?;
        session.dialog = sent;
        session.reply_node = reply;
        session.inline_node = inline;
        Ok(())
    }

    /// Show whatever is left of the session's position after a node vanished.
    async fn recover(&self, session: &mut Session, incoming: &Incoming) -> MenuResult<()> {
        session.state = SessionState::Navigating;

        let reply = match self.store.reply_node(session.reply_node) {
            Ok(node) => node,
            Err(e) if e.is_not_found() => self.store.root()?,
            Err(e) => return Err(e),
        };
        let inline = match self.store.inline_node(session.inline_node) {
            Ok(node) if reply.id == session.reply_node => node.id,
            Ok(_) => reply.inline_id,
            Err(e) if e.is_not_found() => reply.inline_id,
            Err(e) => return Err(e),
        };
        self.show(session, incoming, reply.id, inline, Vec::new()).await
    }
}

/// Messages of the previous turn: the tracked dialog plus the triggering input.
fn stale(session: &Session, incoming: &Incoming) -> Vec<MessageHandle> {
    session.dialog.iter().copied().chain(incoming.message).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::render::Viewer;
    use crate::menu::transport::{DownloadedFile, Keyboard};
    use async_trait::async_trait;

    #[derive(Default)]
    struct NullTransport {
        sent: std::sync::Mutex<Vec<OutgoingMessage>>,
    }

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, chat_id: i64, message: &OutgoingMessage) -> MenuResult<MessageHandle> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            Ok(MessageHandle { chat_id, message_id: sent.len() as i32 })
        }

        async fn delete(&self, _message: MessageHandle) -> MenuResult<()> {
            Ok(())
        }

        async fn copy(&self, chat_id: i64, _message: MessageHandle) -> MenuResult<MessageHandle> {
            if chat_id % 2 == 0 {
                return Err(MenuError::TransportFailure("blocked".to_string()));
            }
            Ok(MessageHandle { chat_id, message_id: 1 })
        }

        async fn download(&self, _file_id: &str) -> MenuResult<DownloadedFile> {
            Ok(DownloadedFile { filename: "file_1.png".to_string(), bytes: b"png".to_vec() })
        }
    }

    fn engine() -> (MenuEngine, Arc<NullTransport>) {
        let transport = Arc::new(NullTransport::default());
        let store = Arc::new(MenuStore::open_in_memory().unwrap());
        let engine = MenuEngine::new(store, transport.clone(), Arc::new(Phrases::default()), HashSet::from([1]));
        (engine, transport)
    }

    fn event(user: i64, payload: Payload) -> Incoming {
        Incoming {
            viewer: Viewer { id: user, username: None, full_name: format!("User {user}") },
            chat_id: user,
            message: Some(MessageHandle { chat_id: user, message_id: 900 }),
            payload,
        }
    }

    #[tokio::test]
    async fn test_unknown_user_gets_user_session() {
        let (engine, _) = engine();
        engine.handle(&event(5, Payload::Text("hi".to_string()))).await.unwrap();

        let session = engine.session(5).await.unwrap();
        assert_eq!(session.role, Role::User);
        assert_eq!(session.reply_node, engine.store().root().unwrap().id);
        assert_eq!(engine.store().user_ids().unwrap(), [5]);
    }

    #[tokio::test]
    async fn test_entry_command_cancels_flow() {
        let (engine, _) = engine();
        engine.open_admin(&event(1, Payload::Other)).await.unwrap();
        engine.handle(&event(1, Payload::Text("Add button".to_string()))).await.unwrap();
        assert_eq!(engine.session(1).await.unwrap().state, SessionState::SubFlow(Flow::AddReplyButton));

        engine.open_user(&event(1, Payload::Other)).await.unwrap();
        let session = engine.session(1).await.unwrap();
        assert_eq!(session.state, SessionState::Navigating);
        assert_eq!(session.role, Role::User);
    }

    #[tokio::test]
    async fn test_attach_file_downloads_and_renders_media() {
        let (engine, transport) = engine();
        engine.open_admin(&event(1, Payload::Other)).await.unwrap();
        let page = engine.store().root().unwrap().inline_id;

        engine.handle(&event(1, Payload::Callback(format!("adm:7:{page}")))).await.unwrap();
        let media = crate::menu::session::MediaRef {
            kind: crate::menu::transport::MediaKind::Photo,
            file_id: "AgAD".to_string(),
            file_name: None,
        };
        engine.handle(&event(1, Payload::Media(media))).await.unwrap();

        assert_eq!(engine.store().file(page).unwrap().unwrap().filename, "file_1.png");
        let sent = transport.sent.lock().unwrap();
        let content = sent.last().unwrap();
        assert!(content.media.is_some());
        assert!(matches!(content.keyboard, Some(Keyboard::Inline(_))));
    }

    #[tokio::test]
    async fn test_copy_to_all_counts_failures() {
        let (engine, _) = engine();
        for id in [1, 2, 3, 4, 5] {
            engine.store().register_user(id, None, "x").unwrap();
        }
        let report = engine.copy_to_all(MessageHandle { chat_id: 1, message_id: 10 }, 1).await.unwrap();
        assert_eq!(report, BroadcastReport { sent: 2, failed: 2 });
    }
}
