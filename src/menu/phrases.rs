//! Button labels and prompts. Every field can be overridden from the
//! `phrases` section of the config file; missing fields keep the defaults.
//!
//! Texts may reference the viewer with `{id}`, `{username}` and `{full_name}`.

use serde::Deserialize;

use super::tree::Alignment;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Phrases {
    pub back: String,
    /// Text of the message carrying the reply keyboard.
    pub loading: String,
    pub admin: AdminPhrases,
}

impl Default for Phrases {
    fn default() -> Self {
        Self {
            back: "Back".to_string(),
            loading: "...".to_string(),
            admin: AdminPhrases::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdminPhrases {
    pub add_button: String,
    pub remove_button: String,
    /// Shown instead of an empty page text.
    pub placeholder: String,
    pub edit_text: String,
    pub edit_name: String,
    pub edit_back_label: String,
    pub buttons_horizontal: String,
    pub buttons_vertical: String,
    pub add_link: String,
    pub remove_link: String,
    pub edit_file: String,
    pub remove_file: String,
    pub enter_name: String,
    pub enter_text: String,
    pub enter_url: String,
    pub enter_back_label: String,
    pub enter_file: String,
    pub enter_broadcast: String,
    pub broadcast_started: String,
    /// `{count}` is replaced with the number of delivered messages.
    pub broadcast_sent: String,
}

impl Default for AdminPhrases {
    fn default() -> Self {
        Self {
            add_button: "Add button".to_string(),
            remove_button: "Remove".to_string(),
            placeholder: "Set a message in the admin menu".to_string(),
            edit_text: "Edit text".to_string(),
            edit_name: "Edit name".to_string(),
            edit_back_label: "Edit \"back\" text".to_string(),
            buttons_horizontal: "Buttons in rows".to_string(),
            buttons_vertical: "Buttons in a column".to_string(),
            add_link: "Add link".to_string(),
            remove_link: "Remove link".to_string(),
            edit_file: "Change file".to_string(),
            remove_file: "Remove file".to_string(),
            enter_name: "Enter the button name".to_string(),
            enter_text: "Enter the text".to_string(),
            enter_url: "Enter the link".to_string(),
            enter_back_label: "Enter the text of the \"back\" button".to_string(),
            enter_file: "Send the file".to_string(),
            enter_broadcast: "Send the message to broadcast".to_string(),
            broadcast_started: "Broadcast started".to_string(),
            broadcast_sent: "Sent {count} messages".to_string(),
        }
    }
}

impl AdminPhrases {
    /// Label of the toggle that switches away from `current`.
    pub fn toggle_label(&self, current: Alignment) -> &str {
        match current {
            Alignment::Vertical => &self.buttons_horizontal,
            Alignment::Horizontal => &self.buttons_vertical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_override_keeps_defaults() {
        let phrases: Phrases = serde_json::from_str(r#"{"back": "Назад", "admin": {"add_button": "Добавить кнопку"}}"#).unwrap();
        assert_eq!(phrases.back, "Назад");
        assert_eq!(phrases.loading, "...");
        assert_eq!(phrases.admin.add_button, "Добавить кнопку");
        assert_eq!(phrases.admin.remove_button, "Remove");
    }
}
