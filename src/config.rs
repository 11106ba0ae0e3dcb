use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use teloxide::types::{ChatId, UserId};
use thiserror::Error;

use crate::menu::Phrases;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config file '{}': {source}", path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },

    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Users allowed to open the editor and broadcast.
    admin_ids: Vec<u64>,
    /// Directory for the database and logs. Defaults to current directory.
    data_dir: Option<String>,
    /// Database file name, relative to `data_dir`.
    database_file: Option<String>,
    log_chat_id: Option<i64>,
    #[serde(default)]
    phrases: Phrases,
}

pub struct Config {
    pub telegram_bot_token: String,
    pub admin_ids: HashSet<UserId>,
    /// Directory for state files (database, logs).
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_chat_id: Option<ChatId>,
    pub phrases: Phrases,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.admin_ids.is_empty() {
            return Err(ConfigError::Validation("admin_ids must contain at least one admin ID".into()));
        }
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let data_dir = file.data_dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        let database_path = data_dir.join(file.database_file.as_deref().unwrap_or("menubot.db"));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            admin_ids: file.admin_ids.into_iter().map(UserId).collect(),
            data_dir,
            database_path,
            log_chat_id: file.log_chat_id.map(ChatId),
            phrases: file.phrases,
        })
    }

    /// Admin ids in the form the menu engine keys sessions by.
    pub fn admin_chat_ids(&self) -> HashSet<i64> {
        self.admin_ids.iter().map(|id| id.0 as i64).collect()
    }
}
