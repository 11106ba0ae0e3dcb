//! Menu builder - paired reply/inline menu trees, per-user sessions and editing flows.

pub mod codec;
pub mod engine;
pub mod error;
pub mod phrases;
pub mod render;
pub mod session;
pub mod transport;
pub mod tree;
pub mod workflow;

pub use codec::{AdminAction, CallbackToken, MAX_TOKEN_LEN, Role, UserAction};
pub use engine::{BroadcastReport, MenuEngine};
pub use error::{MenuError, MenuResult};
pub use phrases::{AdminPhrases, Phrases};
pub use render::{Viewer, inline_keyboard, interpolate, render_dialog, replace_dialog, reply_keyboard};
pub use session::{Command, Incoming, MediaRef, Payload, Session, SessionState, route};
pub use transport::{
    DownloadedFile, InlineButton, Keyboard, Media, MediaKind, MessageHandle, OutgoingMessage, Transport,
};
pub use tree::{
    Alignment, AttachedFile, InlineNode, InlineView, MenuStore, NodeId, ROOT_ID, ReplyNode, ReplyView, TreeStats,
};
pub use workflow::{Edit, Flow, Step};
