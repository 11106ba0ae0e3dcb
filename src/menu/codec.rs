//! Callback tokens carried on inline buttons.
//!
//! Wire form is `<namespace>:<action code>:<node id>`, e.g. `adm:9:42`.
//! Admin and user tokens live in separate namespaces so a token minted for
//! one role never decodes as the other.

use super::error::MenuError;
use super::tree::NodeId;

/// Telegram rejects callback data longer than this.
pub const MAX_TOKEN_LEN: usize = 64;

const ADMIN_PREFIX: &str = "adm";
const USER_PREFIX: &str = "usr";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    fn prefix(self) -> &'static str {
        match self {
            Role::Admin => ADMIN_PREFIX,
            Role::User => USER_PREFIX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminAction {
    OpenChild,
    AddButton,
    RemoveButton,
    ToggleAlignment,
    AddLink,
    RemoveLink,
    EditFile,
    RemoveFile,
    EditText,
    EditBackLabel,
    EditName,
}

impl AdminAction {
    pub const ALL: [AdminAction; 11] = [
        AdminAction::OpenChild,
        AdminAction::AddButton,
        AdminAction::RemoveButton,
        AdminAction::ToggleAlignment,
        AdminAction::AddLink,
        AdminAction::RemoveLink,
        AdminAction::EditFile,
        AdminAction::RemoveFile,
        AdminAction::EditText,
        AdminAction::EditBackLabel,
        AdminAction::EditName,
    ];

    fn code(self) -> u8 {
        match self {
            AdminAction::OpenChild => 0,
            AdminAction::AddButton => 1,
            AdminAction::RemoveButton => 2,
            AdminAction::ToggleAlignment => 3,
            AdminAction::AddLink => 5,
            AdminAction::RemoveLink => 6,
            AdminAction::EditFile => 7,
            AdminAction::RemoveFile => 8,
            AdminAction::EditText => 9,
            AdminAction::EditBackLabel => 10,
            AdminAction::EditName => 11,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.code() == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserAction {
    OpenChild,
}

impl UserAction {
    fn code(self) -> u8 {
        match self {
            UserAction::OpenChild => 0,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(UserAction::OpenChild),
            _ => None,
        }
    }
}

/// A decoded inline-button payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackToken {
    Admin(AdminAction, NodeId),
    User(UserAction, NodeId),
}

impl CallbackToken {
    pub fn role(&self) -> Role {
        match self {
            CallbackToken::Admin(..) => Role::Admin,
            CallbackToken::User(..) => Role::User,
        }
    }

    pub fn target(&self) -> NodeId {
        match self {
            CallbackToken::Admin(_, id) | CallbackToken::User(_, id) => *id,
        }
    }

    pub fn encode(&self) -> String {
        let code = match self {
            CallbackToken::Admin(action, _) => action.code(),
            CallbackToken::User(action, _) => action.code(),
        };
        format!("{}:{}:{}", self.role().prefix(), code, self.target())
    }

    /// Parse a token. Only the exact strings produced by [`encode`] are
    /// accepted, so `adm:01:5` or `adm:+1:5` fail.
    ///
    /// [`encode`]: CallbackToken::encode
    pub fn decode(raw: &str) -> Result<Self, MenuError> {
        let malformed = || MenuError::MalformedToken(raw.to_string());

        if raw.len() > MAX_TOKEN_LEN {
            return Err(malformed());
        }

        let mut parts = raw.split(':');
        let (Some(prefix), Some(code), Some(id), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        let code: u8 = code.parse().map_err(|_| malformed())?;
        let id: NodeId = id.parse().map_err(|_| malformed())?;

        let token = match prefix {
            ADMIN_PREFIX => CallbackToken::Admin(AdminAction::from_code(code).ok_or_else(malformed)?, id),
            USER_PREFIX => CallbackToken::User(UserAction::from_code(code).ok_or_else(malformed)?, id),
            _ => return Err(malformed()),
        };

        if token.encode() != raw {
            return Err(malformed());
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_admin_action() {
        for action in AdminAction::ALL {
            for id in [1, 7, 4096, i64::MAX] {
                let token = CallbackToken::Admin(action, id);
                assert_eq!(CallbackToken::decode(&token.encode()).unwrap(), token);
            }
        }
    }

    #[test]
    fn test_user_round_trip() {
        let token = CallbackToken::User(UserAction::OpenChild, 12);
        assert_eq!(token.encode(), "usr:0:12");
        assert_eq!(CallbackToken::decode("usr:0:12").unwrap(), token);
    }

    #[test]
    fn test_tokens_fit_callback_limit() {
        for action in AdminAction::ALL {
            let token = CallbackToken::Admin(action, i64::MIN);
            assert!(token.encode().len() <= MAX_TOKEN_LEN);
        }
    }

    #[test]
    fn test_namespaces_are_isolated() {
        // Admin-only action code under the user prefix.
        assert!(CallbackToken::decode("usr:9:5").is_err());

        let admin = CallbackToken::decode("adm:0:5").unwrap();
        let user = CallbackToken::decode("usr:0:5").unwrap();
        assert_eq!(admin.role(), Role::Admin);
        assert_eq!(user.role(), Role::User);
        assert_ne!(admin, user);
    }

    #[test]
    fn test_foreign_strings_rejected() {
        for raw in [
            "",
            "adm",
            "adm:1",
            "adm:1:2:3",
            "adm:x:2",
            "adm:1:y",
            "adm:4:2",
            "adm:99:2",
            "adm:01:2",
            "adm:+1:2",
            "adm:1:+2",
            "adm:1:002",
            " adm:1:2",
            "ADM:1:2",
            "admin-inline:1:2",
            "edit_3",
        ] {
            let err = CallbackToken::decode(raw).unwrap_err();
            assert!(matches!(err, MenuError::MalformedToken(_)), "{raw:?} decoded");
        }
    }

    #[test]
    fn test_overlong_token_rejected() {
        let raw = format!("adm:0:{}", "1".repeat(70));
        assert!(CallbackToken::decode(&raw).is_err());
    }
}
