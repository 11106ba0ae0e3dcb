//! Turns a reply/inline node pair into messages and swaps the visible dialog.

use futures_util::future::join_all;
use tracing::{debug, warn};

use super::codec::{AdminAction, CallbackToken, Role, UserAction};
use super::error::MenuResult;
use super::phrases::Phrases;
use super::transport::{InlineButton, Keyboard, Media, MediaKind, MessageHandle, OutgoingMessage, Transport};
use super::tree::{Alignment, InlineNode, InlineView, NodeId, ReplyView};

/// Who is looking at the dialog. Used for text interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: i64,
    pub username: Option<String>,
    pub full_name: String,
}

/// Substitute `{id}`, `{username}` and `{full_name}` in `template`.
pub fn interpolate(template: &str, viewer: &Viewer) -> String {
    template
        .replace("{id}", &viewer.id.to_string())
        .replace("{username}", viewer.username.as_deref().unwrap_or(""))
        .replace("{full_name}", &viewer.full_name)
}

fn layout<T>(buttons: Vec<T>, alignment: Alignment) -> Vec<Vec<T>> {
    let per_row = alignment.per_row();
    let mut rows: Vec<Vec<T>> = Vec::new();
    for button in buttons {
        match rows.last_mut() {
            Some(row) if row.len() < per_row => row.push(button),
            _ => rows.push(vec![button]),
        }
    }
    rows
}

fn reply_back_label<'a>(view: &'a ReplyView, phrases: &'a Phrases) -> &'a str {
    view.node.back_label.as_deref().unwrap_or(&phrases.back)
}

/// Whether `text` is the back control of this reply node.
pub fn is_back_label(text: &str, view: &ReplyView, phrases: &Phrases) -> bool {
    text == phrases.back || view.node.back_label.as_deref() == Some(text)
}

/// Reply keyboard for a reply node.
pub fn reply_keyboard(role: Role, view: &ReplyView, phrases: &Phrases) -> Keyboard {
    let names = view.children.iter().map(|c| c.name.clone()).collect();
    let mut rows = layout(names, view.node.alignment);

    match role {
        Role::Admin => {
            let admin = &phrases.admin;
            let mut controls = vec![admin.add_button.clone()];
            if view.children.len() >= 2 {
                controls.push(admin.toggle_label(view.node.alignment).to_string());
            }
            if !view.is_root() {
                controls.push(admin.remove_button.clone());
            }
            rows.push(controls);

            if !view.is_root() {
                rows.push(vec![admin.edit_name.clone(), admin.edit_back_label.clone()]);
                rows.push(vec![reply_back_label(view, phrases).to_string()]);
            }
        }
        Role::User => {
            if !view.is_root() {
                rows.push(vec![reply_back_label(view, phrases).to_string()]);
            }
        }
    }

    Keyboard::Reply(rows)
}

fn open_token(role: Role, target: NodeId) -> String {
    match role {
        Role::Admin => CallbackToken::Admin(AdminAction::OpenChild, target),
        Role::User => CallbackToken::User(UserAction::OpenChild, target),
    }
    .encode()
}

fn child_button(role: Role, child: &InlineNode) -> InlineButton {
    match &child.url {
        Some(url) => InlineButton::Link { label: child.name.clone(), url: url.clone() },
        None => InlineButton::Callback { label: child.name.clone(), token: open_token(role, child.id) },
    }
}

/// Inline keyboard for an inline node.
pub fn inline_keyboard(role: Role, view: &InlineView, phrases: &Phrases) -> Keyboard {
    let node = &view.node;
    let children = view.children.iter().map(|c| child_button(role, c)).collect();
    let mut rows = layout(children, node.alignment);

    if role == Role::Admin {
        let admin = &phrases.admin;
        let control = |label: &str, action: AdminAction| InlineButton::Callback {
            label: label.to_string(),
            token: CallbackToken::Admin(action, node.id).encode(),
        };

        let mut text_row = vec![control(&admin.edit_text, AdminAction::EditText)];
        if view.has_parent() {
            text_row.push(control(&admin.edit_name, AdminAction::EditName));
            text_row.push(control(&admin.edit_back_label, AdminAction::EditBackLabel));
        }
        rows.push(text_row);

        let mut button_row = vec![control(&admin.add_button, AdminAction::AddButton)];
        if view.children.len() >= 2 {
            button_row.push(control(admin.toggle_label(node.alignment), AdminAction::ToggleAlignment));
        }
        rows.push(button_row);

        let mut link_row = vec![control(&admin.add_link, AdminAction::AddLink)];
        if view.has_links() {
            link_row.push(control(&admin.remove_link, AdminAction::RemoveLink));
        }
        rows.push(link_row);

        let mut file_row = vec![control(&admin.edit_file, AdminAction::EditFile)];
        if view.file.is_some() {
            file_row.push(control(&admin.remove_file, AdminAction::RemoveFile));
        }
        if view.has_parent() {
            file_row.push(control(&admin.remove_button, AdminAction::RemoveButton));
        }
        rows.push(file_row);
    }

    if let Some(parent) = node.parent_id {
        rows.push(vec![InlineButton::Callback {
            label: node.back_label.clone().unwrap_or_else(|| phrases.back.clone()),
            token: open_token(role, parent),
        }]);
    }

    Keyboard::Inline(rows)
}

/// Build the messages showing `inline` under the reply keyboard of `reply`.
///
/// The reply keyboard rides on its own carrier message, sent first. The
/// content message follows with the inline keyboard, as media with a caption
/// when a file is attached.
pub fn render_dialog(
    role: Role,
    reply: &ReplyView,
    inline: &InlineView,
    phrases: &Phrases,
    viewer: &Viewer,
) -> Vec<OutgoingMessage> {
    let carrier = OutgoingMessage::text(interpolate(&phrases.loading, viewer))
        .with_keyboard(reply_keyboard(role, reply, phrases));

    // A template can interpolate to nothing, e.g. `{username}` for a viewer without one.
    let text = inline
        .node
        .text
        .as_deref()
        .map(|text| interpolate(text, viewer))
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| interpolate(&phrases.admin.placeholder, viewer));
    let mut content = OutgoingMessage::text(text).with_keyboard(inline_keyboard(role, inline, phrases));

    if let Some(file) = &inline.file {
        content = content.with_media(Media {
            kind: MediaKind::for_filename(&file.filename),
            filename: file.filename.clone(),
            bytes: file.bytes.clone(),
        });
    }

    vec![carrier, content]
}

/// Send `messages` in order, then delete the `stale` messages of the
/// previous turn. Returns the handles of the new dialog.
///
/// Deletes run concurrently and their failures are only logged. If a send
/// fails, whatever part of the new dialog got through is removed again and
/// the error is returned, leaving the previous dialog in place.
pub async fn replace_dialog(
    transport: &dyn Transport,
    chat_id: i64,
    stale: Vec<MessageHandle>,
    messages: &[OutgoingMessage],
) -> MenuResult<Vec<MessageHandle>> {
    let mut sent = Vec::with_capacity(messages.len());
    for message in messages {
        match transport.send(chat_id, message).await {
            Ok(handle) => sent.push(handle),
            Err(e) => {
                warn!(chat_id, error = %e, "Failed to send dialog message");
                delete_all(transport, sent).await;
                return Err(e);
            }
        }
    }

    delete_all(transport, stale).await;
    Ok(sent)
}

/// Best-effort concurrent delete.
pub async fn delete_all(transport: &dyn Transport, handles: Vec<MessageHandle>) {
    if handles.is_empty() {
        return;
    }
    let results = join_all(handles.iter().map(|h| transport.delete(*h))).await;
    for (handle, result) in handles.iter().zip(results) {
        if let Err(e) = result {
            debug!(message_id = handle.message_id, error = %e, "Ignoring failed delete");
        }
    }
}
