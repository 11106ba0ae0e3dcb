//! Short editing dialogs that collect input before committing one tree edit.
//!
//! A [`Flow`] is pure: it validates a payload and either asks for the next
//! answer or yields an [`Edit`]. The engine persists the edit and re-renders.

use super::error::{MenuError, MenuResult};
use super::phrases::Phrases;
use super::session::{MediaRef, Payload};
use super::tree::NodeId;

/// A waiting sub-flow. Reply-tree flows act on the session's current reply node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    AddReplyButton,
    RenameReplyNode,
    EditReplyBackLabel,
    AddInlineButton { parent: NodeId },
    AddLink { parent: NodeId, name: Option<String> },
    RemoveLink { parent: NodeId },
    EditText { node: NodeId },
    EditName { node: NodeId },
    EditBackLabel { node: NodeId },
    AttachFile { node: NodeId },
    Broadcast,
}

/// A validated edit, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    AddReplyButton { name: String },
    RenameReplyNode { name: String },
    SetReplyBackLabel { label: String },
    AddInlineButton { parent: NodeId, name: String },
    AddLink { parent: NodeId, name: String, url: String },
    RemoveLink { parent: NodeId, url: String },
    SetText { node: NodeId, text: String },
    SetName { node: NodeId, name: String },
    SetBackLabel { node: NodeId, label: String },
    AttachFile { node: NodeId, media: MediaRef },
    Broadcast,
}

impl Edit {
    /// Inline node to show once the edit is applied. `None` keeps the
    /// current reply node's page.
    pub fn inline_target(&self) -> Option<NodeId> {
        match self {
            Edit::AddInlineButton { parent, .. } | Edit::AddLink { parent, .. } | Edit::RemoveLink { parent, .. } => {
                Some(*parent)
            }
            Edit::SetText { node, .. }
            | Edit::SetName { node, .. }
            | Edit::SetBackLabel { node, .. }
            | Edit::AttachFile { node, .. } => Some(*node),
            Edit::AddReplyButton { .. }
            | Edit::RenameReplyNode { .. }
            | Edit::SetReplyBackLabel { .. }
            | Edit::Broadcast => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Ask for the next answer.
    Continue(Flow),
    Apply(Edit),
}

impl Flow {
    pub fn name(&self) -> &'static str {
        match self {
            Flow::AddReplyButton => "add reply button",
            Flow::RenameReplyNode => "rename reply button",
            Flow::EditReplyBackLabel => "edit reply back label",
            Flow::AddInlineButton { .. } => "add inline button",
            Flow::AddLink { .. } => "add link",
            Flow::RemoveLink { .. } => "remove link",
            Flow::EditText { .. } => "edit text",
            Flow::EditName { .. } => "edit name",
            Flow::EditBackLabel { .. } => "edit back label",
            Flow::AttachFile { .. } => "attach file",
            Flow::Broadcast => "broadcast",
        }
    }

    pub fn prompt<'a>(&self, phrases: &'a Phrases) -> &'a str {
        let admin = &phrases.admin;
        match self {
            Flow::AddReplyButton
            | Flow::RenameReplyNode
            | Flow::AddInlineButton { .. }
            | Flow::AddLink { name: None, .. }
            | Flow::EditName { .. } => &admin.enter_name,
            Flow::AddLink { name: Some(_), .. } | Flow::RemoveLink { .. } => &admin.enter_url,
            Flow::EditReplyBackLabel | Flow::EditBackLabel { .. } => &admin.enter_back_label,
            Flow::EditText { .. } => &admin.enter_text,
            Flow::AttachFile { .. } => &admin.enter_file,
            Flow::Broadcast => &admin.enter_broadcast,
        }
    }

    /// Feed one incoming payload to the flow.
    ///
    /// Invalid input fails with [`MenuError::UnsupportedContent`]; the caller
    /// keeps the flow waiting.
    pub fn accept(self, payload: &Payload) -> MenuResult<Step> {
        let unsupported = MenuError::UnsupportedContent(self.name());

        let step = match self {
            Flow::AddReplyButton => Step::Apply(Edit::AddReplyButton { name: non_empty(payload).ok_or(unsupported)? }),
            Flow::RenameReplyNode => Step::Apply(Edit::RenameReplyNode { name: non_empty(payload).ok_or(unsupported)? }),
            Flow::EditReplyBackLabel => {
                Step::Apply(Edit::SetReplyBackLabel { label: non_empty(payload).ok_or(unsupported)? })
            }
            Flow::AddInlineButton { parent } => {
                Step::Apply(Edit::AddInlineButton { parent, name: non_empty(payload).ok_or(unsupported)? })
            }
            Flow::AddLink { parent, name: None } => {
                Step::Continue(Flow::AddLink { parent, name: Some(non_empty(payload).ok_or(unsupported)?) })
            }
            Flow::AddLink { parent, name: Some(name) } => {
                Step::Apply(Edit::AddLink { parent, name, url: url(payload).ok_or(unsupported)? })
            }
            Flow::RemoveLink { parent } => Step::Apply(Edit::RemoveLink { parent, url: url(payload).ok_or(unsupported)? }),
            Flow::EditText { node } => Step::Apply(Edit::SetText { node, text: non_empty(payload).ok_or(unsupported)? }),
            Flow::EditName { node } => Step::Apply(Edit::SetName { node, name: non_empty(payload).ok_or(unsupported)? }),
            Flow::EditBackLabel { node } => {
                Step::Apply(Edit::SetBackLabel { node, label: non_empty(payload).ok_or(unsupported)? })
            }
            Flow::AttachFile { node } => match payload {
                Payload::Media(media) => Step::Apply(Edit::AttachFile { node, media: media.clone() }),
                _ => return Err(unsupported),
            },
            Flow::Broadcast => match payload {
                Payload::Callback(_) => return Err(unsupported),
                Payload::Text(_) | Payload::Media(_) | Payload::Other => Step::Apply(Edit::Broadcast),
            },
        };
        Ok(step)
    }
}

fn non_empty(payload: &Payload) -> Option<String> {
    match payload {
        Payload::Text(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

fn url(payload: &Payload) -> Option<String> {
    non_empty(payload).filter(|text| text.starts_with("http"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::transport::MediaKind;

    fn text(s: &str) -> Payload {
        Payload::Text(s.to_string())
    }

    fn photo() -> Payload {
        Payload::Media(MediaRef { kind: MediaKind::Photo, file_id: "AgAD".to_string(), file_name: None })
    }

    fn assert_unsupported(flow: Flow, payload: Payload) {
        let err = flow.clone().accept(&payload).unwrap_err();
        assert!(matches!(err, MenuError::UnsupportedContent(_)), "{flow:?} accepted {payload:?}");
    }

    #[test]
    fn test_add_link_chains_name_then_url() {
        let step = Flow::AddLink { parent: 7, name: None }.accept(&text("Link")).unwrap();
        let Step::Continue(next) = step else { panic!("expected second prompt") };
        assert_eq!(next, Flow::AddLink { parent: 7, name: Some("Link".to_string()) });

        assert_unsupported(next.clone(), text("example.com"));
        assert_unsupported(next.clone(), photo());

        let step = next.accept(&text("http://example.com")).unwrap();
        assert_eq!(
            step,
            Step::Apply(Edit::AddLink { parent: 7, name: "Link".to_string(), url: "http://example.com".to_string() })
        );
    }

    #[test]
    fn test_name_flows_need_text() {
        for flow in [
            Flow::AddReplyButton,
            Flow::RenameReplyNode,
            Flow::EditReplyBackLabel,
            Flow::AddInlineButton { parent: 3 },
            Flow::EditText { node: 3 },
            Flow::EditName { node: 3 },
            Flow::EditBackLabel { node: 3 },
        ] {
            assert_unsupported(flow.clone(), text("   "));
            assert_unsupported(flow.clone(), photo());
            assert_unsupported(flow.clone(), Payload::Other);
            assert!(matches!(flow.accept(&text("Prices")), Ok(Step::Apply(_))));
        }
    }

    #[test]
    fn test_names_are_trimmed() {
        let step = Flow::AddReplyButton.accept(&text("  Prices \n")).unwrap();
        assert_eq!(step, Step::Apply(Edit::AddReplyButton { name: "Prices".to_string() }));
    }

    #[test]
    fn test_attach_file_needs_media() {
        assert_unsupported(Flow::AttachFile { node: 4 }, text("file.png"));
        assert_unsupported(Flow::AttachFile { node: 4 }, Payload::Other);

        let Step::Apply(edit) = Flow::AttachFile { node: 4 }.accept(&photo()).unwrap() else {
            panic!("expected edit")
        };
        assert_eq!(edit.inline_target(), Some(4));
    }

    #[test]
    fn test_remove_link_takes_url() {
        assert_unsupported(Flow::RemoveLink { parent: 2 }, text("Site"));
        let step = Flow::RemoveLink { parent: 2 }.accept(&text("https://a.example")).unwrap();
        assert_eq!(step, Step::Apply(Edit::RemoveLink { parent: 2, url: "https://a.example".to_string() }));
    }

    #[test]
    fn test_broadcast_accepts_any_message() {
        for payload in [text("news"), photo(), Payload::Other] {
            assert_eq!(Flow::Broadcast.accept(&payload).unwrap(), Step::Apply(Edit::Broadcast));
        }
        assert_unsupported(Flow::Broadcast, Payload::Callback("adm:1:1".to_string()));
    }

    #[test]
    fn test_prompts() {
        let phrases = Phrases::default();
        let admin = &phrases.admin;
        assert_eq!(Flow::AddLink { parent: 1, name: None }.prompt(&phrases), admin.enter_name);
        assert_eq!(Flow::AddLink { parent: 1, name: Some("x".into()) }.prompt(&phrases), admin.enter_url);
        assert_eq!(Flow::AttachFile { node: 1 }.prompt(&phrases), admin.enter_file);
        assert_eq!(Flow::EditBackLabel { node: 1 }.prompt(&phrases), admin.enter_back_label);
        assert_eq!(Flow::Broadcast.prompt(&phrases), admin.enter_broadcast);
    }
}
