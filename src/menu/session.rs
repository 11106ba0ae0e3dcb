//! Per-user session state and event routing.
//!
//! [`route`] decides what a navigating session does with an event. It reads
//! the current reply view but never touches storage or the transport.

use super::codec::{AdminAction, CallbackToken, Role, UserAction};
use super::error::MenuResult;
use super::phrases::Phrases;
use super::render::{Viewer, is_back_label};
use super::transport::{MediaKind, MessageHandle};
use super::tree::{NodeId, ReplyNode, ReplyView};
use super::workflow::Flow;

/// A file sent by the user, not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
    /// Original name, known for documents.
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Media(MediaRef),
    /// Raw callback data from an inline button.
    Callback(String),
    /// Anything else (stickers, voice, locations).
    Other,
}

/// One event from a user.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub viewer: Viewer,
    pub chat_id: i64,
    /// The user's own message, deleted with the dialog it triggered.
    pub message: Option<MessageHandle>,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Navigating,
    SubFlow(Flow),
}

#[derive(Debug, Clone)]
pub struct Session {
    pub role: Role,
    pub reply_node: NodeId,
    /// Inline node currently shown under the reply node.
    pub inline_node: NodeId,
    /// Messages of the visible dialog, deleted on the next transition.
    pub dialog: Vec<MessageHandle>,
    pub state: SessionState,
}

impl Session {
    /// A navigating session at `node`, showing its page.
    pub fn at(role: Role, node: &ReplyNode) -> Self {
        Self {
            role,
            reply_node: node.id,
            inline_node: node.inline_id,
            dialog: Vec::new(),
            state: SessionState::Navigating,
        }
    }
}

/// What a navigating session does with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    OpenReply(NodeId),
    Back,
    RemoveReply,
    ToggleReply,
    OpenInline(NodeId),
    RemoveInline(NodeId),
    ToggleInline(NodeId),
    RemoveFile(NodeId),
    StartFlow(Flow),
    Ignore,
}

/// Match an event against the triggers of the current state.
///
/// Exact control labels win over child names, which win over the fallback
/// of ignoring the event. Controls not shown on the current keyboard do not
/// match. Callback data that does not decode fails `MalformedToken`.
pub fn route(role: Role, payload: &Payload, view: &ReplyView, phrases: &Phrases) -> MenuResult<Command> {
    match payload {
        Payload::Text(text) => Ok(route_text(role, text, view, phrases)),
        Payload::Callback(raw) => {
            let token = CallbackToken::decode(raw)?;
            Ok(route_token(role, token))
        }
        Payload::Media(_) | Payload::Other => Ok(Command::Ignore),
    }
}

fn route_text(role: Role, text: &str, view: &ReplyView, phrases: &Phrases) -> Command {
    if !view.is_root() && is_back_label(text, view, phrases) {
        return Command::Back;
    }

    if role == Role::Admin {
        let admin = &phrases.admin;
        if text == admin.add_button {
            return Command::StartFlow(Flow::AddReplyButton);
        }
        if view.children.len() >= 2 && text == admin.toggle_label(view.node.alignment) {
            return Command::ToggleReply;
        }
        if !view.is_root() {
            if text == admin.remove_button {
                return Command::RemoveReply;
            }
            if text == admin.edit_name {
                return Command::StartFlow(Flow::RenameReplyNode);
            }
            if text == admin.edit_back_label {
                return Command::StartFlow(Flow::EditReplyBackLabel);
            }
        }
    }

    match view.child_named(text) {
        Some(child) => Command::OpenReply(child.id),
        None => Command::Ignore,
    }
}

fn route_token(role: Role, token: CallbackToken) -> Command {
    match (role, token) {
        (Role::User, CallbackToken::User(UserAction::OpenChild, id)) => Command::OpenInline(id),
        (Role::Admin, CallbackToken::Admin(action, id)) => match action {
            AdminAction::OpenChild => Command::OpenInline(id),
            AdminAction::AddButton => Command::StartFlow(Flow::AddInlineButton { parent: id }),
            AdminAction::RemoveButton => Command::RemoveInline(id),
            AdminAction::ToggleAlignment => Command::ToggleInline(id),
            AdminAction::AddLink => Command::StartFlow(Flow::AddLink { parent: id, name: None }),
            AdminAction::RemoveLink => Command::StartFlow(Flow::RemoveLink { parent: id }),
            AdminAction::EditFile => Command::StartFlow(Flow::AttachFile { node: id }),
            AdminAction::RemoveFile => Command::RemoveFile(id),
            AdminAction::EditText => Command::StartFlow(Flow::EditText { node: id }),
            AdminAction::EditBackLabel => Command::StartFlow(Flow::EditBackLabel { node: id }),
            AdminAction::EditName => Command::StartFlow(Flow::EditName { node: id }),
        },
        // Token from the other role's namespace.
        _ => Command::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::error::MenuError;
    use crate::menu::tree::Alignment;

    fn node(id: NodeId, parent: Option<NodeId>, name: &str) -> ReplyNode {
        ReplyNode {
            id,
            parent_id: parent,
            name: name.to_string(),
            alignment: Alignment::Vertical,
            back_label: None,
            inline_id: id + 100,
        }
    }

    fn root_view() -> ReplyView {
        ReplyView { node: node(1, None, ""), children: vec![node(2, Some(1), "A"), node(3, Some(1), "B")] }
    }

    fn child_view() -> ReplyView {
        ReplyView { node: node(2, Some(1), "A"), children: vec![node(4, Some(2), "Remove")] }
    }

    fn text(s: &str) -> Payload {
        Payload::Text(s.to_string())
    }

    fn route_ok(role: Role, payload: Payload, view: &ReplyView) -> Command {
        route(role, &payload, view, &Phrases::default()).unwrap()
    }

    #[test]
    fn test_child_name_opens_child() {
        assert_eq!(route_ok(Role::User, text("A"), &root_view()), Command::OpenReply(2));
        assert_eq!(route_ok(Role::User, text("a"), &root_view()), Command::Ignore);
    }

    #[test]
    fn test_back_only_below_root() {
        assert_eq!(route_ok(Role::User, text("Back"), &child_view()), Command::Back);
        assert_eq!(route_ok(Role::User, text("Back"), &root_view()), Command::Ignore);
    }

    #[test]
    fn test_custom_back_label() {
        let mut view = child_view();
        view.node.back_label = Some("Up".to_string());
        assert_eq!(route_ok(Role::User, text("Up"), &view), Command::Back);
    }

    #[test]
    fn test_users_cannot_use_admin_labels() {
        assert_eq!(route_ok(Role::User, text("Add button"), &root_view()), Command::Ignore);
        // A child that happens to share a control label is still a child for users.
        assert_eq!(route_ok(Role::User, text("Remove"), &child_view()), Command::OpenReply(4));
    }

    #[test]
    fn test_admin_controls_win_over_children() {
        assert_eq!(route_ok(Role::Admin, text("Remove"), &child_view()), Command::RemoveReply);
        assert_eq!(
            route_ok(Role::Admin, text("Add button"), &root_view()),
            Command::StartFlow(Flow::AddReplyButton)
        );
        assert_eq!(route_ok(Role::Admin, text("Buttons in rows"), &root_view()), Command::ToggleReply);
        assert_eq!(
            route_ok(Role::Admin, text("Edit name"), &child_view()),
            Command::StartFlow(Flow::RenameReplyNode)
        );
    }

    #[test]
    fn test_hidden_controls_do_not_match() {
        // Root has no remove control; the toggle needs two children.
        assert_eq!(route_ok(Role::Admin, text("Remove"), &root_view()), Command::Ignore);
        assert_eq!(route_ok(Role::Admin, text("Buttons in rows"), &child_view()), Command::Ignore);
    }

    #[test]
    fn test_tokens_route_by_role() {
        let view = root_view();
        assert_eq!(
            route_ok(Role::Admin, Payload::Callback("adm:5:7".to_string()), &view),
            Command::StartFlow(Flow::AddLink { parent: 7, name: None })
        );
        assert_eq!(route_ok(Role::User, Payload::Callback("usr:0:9".to_string()), &view), Command::OpenInline(9));
        assert_eq!(route_ok(Role::User, Payload::Callback("adm:2:9".to_string()), &view), Command::Ignore);
        assert_eq!(route_ok(Role::Admin, Payload::Callback("usr:0:9".to_string()), &view), Command::Ignore);
    }

    #[test]
    fn test_foreign_callback_is_malformed() {
        let err = route(Role::Admin, &Payload::Callback("hello".to_string()), &root_view(), &Phrases::default())
            .unwrap_err();
        assert!(matches!(err, MenuError::MalformedToken(_)));
    }

    #[test]
    fn test_media_is_ignored_while_navigating() {
        let media = Payload::Media(MediaRef { kind: MediaKind::Document, file_id: "x".into(), file_name: None });
        assert_eq!(route_ok(Role::Admin, media, &root_view()), Command::Ignore);
    }
}
