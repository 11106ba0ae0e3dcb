//! Telegram menu-builder bot: admins build a button menu, users navigate it.

pub mod config;
pub mod menu;
pub mod telegram;
pub mod telegram_log;
