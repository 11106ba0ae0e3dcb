//! Error taxonomy shared by the menu components.

use thiserror::Error;

/// Errors raised while editing or navigating the menu.
#[derive(Debug, Error)]
pub enum MenuError {
    /// A referenced node, file or session is gone.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// A callback token this bot did not produce.
    #[error("malformed callback token: {0:?}")]
    MalformedToken(String),

    /// Wrong kind of input for the active sub-flow.
    #[error("unsupported content for {0}")]
    UnsupportedContent(&'static str),

    /// A structural rule forbids the edit (root removal, children under a link).
    #[error("rejected: {0}")]
    Rejected(&'static str),

    /// The messaging platform refused a send, delete or download.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl MenuError {
    pub fn reply_node(id: i64) -> Self {
        Self::NotFound { kind: "reply node", id }
    }

    pub fn inline_node(id: i64) -> Self {
        Self::NotFound { kind: "inline node", id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Errors caused by the event rather than by the platform or database.
    /// The session stays usable after them.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::TransportFailure(_) | Self::Storage(_))
    }
}

pub type MenuResult<T> = Result<T, MenuError>;
