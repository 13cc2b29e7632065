//! Parley Telegram - collaborator adapters for running the session engine as a Telegram bot.
//!
//! - [`TelegramTransport`]: posts and edits messages through the Bot API
//! - [`TelegraphPublisher`]: publishes answers too long for one message
//! - [`format`]: Markdown to Telegram HTML rendering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

mod api;
pub mod format;
pub mod telegraph;
pub mod transport;

pub use format::to_telegram_html;
pub use telegraph::TelegraphPublisher;
pub use transport::TelegramTransport;
